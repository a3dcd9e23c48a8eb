//! Veridian Storage - layered state views for contract execution.
//!
//! Three layers, outermost first:
//! - [`LedgerStore`]: the persistent backend, consumed as a trait
//! - [`OverlayDB`]: the block-scoped write layer over the ledger
//! - [`CacheDb`]: the transaction-scoped write buffer over the overlay
//!
//! Every contract mutation flows through a `CacheDb`; committing flushes
//! into the overlay, dropping the cache discards all pending writes.

pub mod cache;
pub mod error;
pub mod ledger;
pub mod overlay;

pub use cache::{CacheDb, CacheIter};
pub use error::StorageError;
pub use ledger::{LedgerStore, MemLedger};
pub use overlay::{OverlayDB, SharedOverlay};
