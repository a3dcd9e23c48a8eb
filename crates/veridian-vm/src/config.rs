use serde::{Deserialize, Serialize};

/// Tunables of the execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Capacity of the compiled-module LRU cache
    pub code_cache_size: usize,
    /// Execution step budget per transaction
    pub exec_step_limit: u64,
    /// Guest linear memory cap, in 64 KiB pages (160 = 10 MiB)
    pub max_memory_pages: u32,
    /// Execution steps per unit of gas
    pub gas_factor: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            code_cache_size: crate::CODE_CACHE_SIZE,
            exec_step_limit: crate::EXEC_STEP_LIMIT,
            max_memory_pages: crate::WASM_MEMORY_PAGES,
            gas_factor: crate::gas_metering::DEFAULT_GAS_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = VmConfig::default();
        assert_eq!(cfg.code_cache_size, 100);
        assert_eq!(cfg.exec_step_limit, 40_000_000);
        assert_eq!(cfg.max_memory_pages, 160);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: VmConfig = serde_json::from_str(r#"{"exec_step_limit": 1000}"#).unwrap();
        assert_eq!(cfg.exec_step_limit, 1000);
        assert_eq!(cfg.code_cache_size, 100);
    }
}
