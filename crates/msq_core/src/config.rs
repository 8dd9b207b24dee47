//! Engine configuration: the whitelisted host-side knobs plus the fixed
//! protocol limits. Everything else about a run is determined by the
//! snapshot, the request, and the gas limit.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Trap};
use crate::gas;

/// Fixed protocol limits (not configurable; changing one is a protocol
/// version change).
pub const HTTP_MAX_REQUEST_BYTES: u64 = 10 * (1 << 20);
pub const HTTP_MAX_RESPONSE_BYTES: u64 = 50 * (1 << 20);
pub const DB_POOL_PER_REQUEST: usize = 16;

/// Smallest admissible per-request heap budget.
pub const MIN_MEMORY_BUDGET_BYTES: u64 = 1 << 20;

/// Default per-request heap budget (host-sized linear heap).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 8 << 20;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-request heap budget in bytes; at least `MIN_MEMORY_BUDGET_BYTES`.
    pub memory_budget_bytes: u64,
    /// Database location for the per-context pool (`:memory:` for tests).
    pub db_path: String,
    /// TLS verification for `HttpOut`. `false` is dev-only.
    pub verify_tls: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            db_path: ":memory:".to_string(),
            verify_tls: true,
        }
    }
}

impl EngineConfig {
    /// Host-side validation; runs before any context is created.
    pub fn validate(&self) -> Result<(), Trap> {
        if self.memory_budget_bytes < MIN_MEMORY_BUDGET_BYTES {
            return Err(Trap::new(
                ErrorKind::Internal,
                format!(
                    "memory budget {} below minimum {MIN_MEMORY_BUDGET_BYTES}",
                    self.memory_budget_bytes
                ),
            ));
        }
        Ok(())
    }

    /// Validate a host-supplied gas limit against the protocol bounds.
    pub fn validate_gas_limit(&self, limit: u64) -> Result<(), Trap> {
        gas::validate_gas_limit(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn tiny_heap_rejected() {
        let cfg = EngineConfig {
            memory_budget_bytes: 1024,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fixed_limits_are_protocol_constants() {
        assert_eq!(HTTP_MAX_REQUEST_BYTES, 10 * 1024 * 1024);
        assert_eq!(HTTP_MAX_RESPONSE_BYTES, 50 * 1024 * 1024);
        assert_eq!(DB_POOL_PER_REQUEST, 16);
    }
}
