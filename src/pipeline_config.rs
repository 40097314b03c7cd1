//! Tuning record handed to the extraction coordinator and the clarification
//! engine at construction time.

use serde::{Deserialize, Serialize};

/// Upper bound on clarification rounds unless configured otherwise.
pub const DEFAULT_MAX_ROUNDS: usize = 2;
/// Questions asked per round.
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Clarification rounds a session may start.
    pub max_rounds: usize,
    /// Gaps turned into questions per round.
    pub batch_size: usize,
    /// HTTP timeout for one model call, in seconds.
    pub model_timeout_secs: u64,
    /// Extra model attempts after a malformed answer. Other failures are
    /// never retried.
    pub model_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            batch_size: DEFAULT_BATCH_SIZE,
            model_timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
            model_retries: 0,
        }
    }
}

impl PipelineConfig {
    /// Clamp nonsensical values: a round must ask at least one question.
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            tracing::warn!("batch_size 0 is not usable, falling back to default");
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.model_timeout_secs == 0 {
            self.model_timeout_secs = DEFAULT_MODEL_TIMEOUT_SECS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_interview_limits() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.model_retries, 0);
    }

    #[test]
    fn normalized_repairs_zero_values() {
        let config = PipelineConfig {
            max_rounds: 0,
            batch_size: 0,
            model_timeout_secs: 0,
            model_retries: 1,
        }
        .normalized();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.model_timeout_secs, DEFAULT_MODEL_TIMEOUT_SECS);
        // Zero rounds is a valid choice: extraction only.
        assert_eq!(config.max_rounds, 0);
        assert_eq!(config.model_retries, 1);
    }
}
