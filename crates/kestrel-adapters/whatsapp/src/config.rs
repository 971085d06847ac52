//! Normalizer configuration.

use serde::{Deserialize, Serialize};

/// Settings for [`WhatsAppDecoder`](crate::WhatsAppDecoder).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Command prefixes, tried in order.
    pub prefixes: Vec<String>,
    /// Whether a command must start with one of `prefixes`.
    pub require_prefix: bool,
    /// Maximum number of records kept in the correlation log.
    pub correlation_capacity: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            prefixes: vec![".".into(), "!".into(), "#".into()],
            require_prefix: true,
            correlation_capacity: 10_000,
        }
    }
}
