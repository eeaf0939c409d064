//! Communicator configuration

use serde::Deserialize;

/// Default upper bound for an encoded message descriptor.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// Communicator configuration
///
/// Deserializable so callers can load it from their own config files:
///
/// ```
/// let cfg: tiercomm::CommunicatorConfig =
///     serde_json::from_str(r#"{ "use_device_collectives": true }"#).unwrap();
/// assert!(cfg.use_device_collectives);
/// assert_eq!(cfg.max_header_bytes, tiercomm::config::DEFAULT_MAX_HEADER_BYTES);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Build an intra-node device collective scope alongside the process scopes.
    pub use_device_collectives: bool,
    /// Largest descriptor header `recv` accepts before treating the peer as broken.
    pub max_header_bytes: usize,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            use_device_collectives: false,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl CommunicatorConfig {
    pub fn with_device_collectives(mut self, enabled: bool) -> Self {
        self.use_device_collectives = enabled;
        self
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }
}
