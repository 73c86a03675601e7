//! Error taxonomy for the dialogue engine
//!
//! Errors are recovered as close to their origin as possible: extraction
//! failures drop the offending slot, persistence failures fall back to a
//! fresh in-memory session, and analyzer failures are replaced with neutral
//! defaults at the orchestrator. Only a failure to obtain a session at all
//! surfaces as a fallback result.

use thiserror::Error;

/// Errors raised inside the dialogue engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A slot candidate could not be extracted or validated.
    ///
    /// Recovered locally: the slot is omitted, extraction continues.
    #[error("slot extraction failed for '{slot}': {reason}")]
    Extraction { slot: String, reason: String },

    /// The persistence collaborator failed or timed out.
    ///
    /// Recovered by treating the session as fresh; the turn still
    /// completes but is flagged as not durably saved.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A single analyzer stage failed.
    ///
    /// Caught at the orchestrator and replaced with a neutral default
    /// for that stage only.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailure {
        stage: &'static str,
        reason: String,
    },

    /// The pipeline failed before a session could be obtained.
    ///
    /// Surfaces as a fallback `DialogueFlowResult`, never as an
    /// unhandled error to the caller.
    #[error("pipeline failure: {0}")]
    Pipeline(String),
}

impl EngineError {
    /// Stage name for orchestrator logging, where one applies.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            EngineError::StageFailure { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::StageFailure {
            stage: "suggestions",
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "stage 'suggestions' failed: boom");
        assert_eq!(err.stage(), Some("suggestions"));

        let err = EngineError::PersistenceUnavailable("timeout".to_string());
        assert!(err.stage().is_none());
    }
}
