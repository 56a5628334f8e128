//! Engine tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds applied to every generation-backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPolicy {
    /// Per-call timeout
    pub timeout_secs: u64,

    /// Attempts per discovery request (timeouts, provider errors and unparseable replies all count)
    pub max_attempts: u32,

    /// Pause between attempts
    pub backoff_ms: u64,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_attempts: 2,
            backoff_ms: 500,
        }
    }
}

impl GenerationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Discovery proposals below this confidence are dropped
    pub confidence_floor: f64,

    /// Rows per tenant table shown in prompts when a sample source is attached; 0 disables
    pub sample_rows: usize,

    pub generation: GenerationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            sample_rows: 3,
            generation: GenerationPolicy::default(),
        }
    }
}
