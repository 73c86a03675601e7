//! Engine tuning parameters
//!
//! All caps, TTLs and thresholds that govern bounded-memory behavior live
//! here so hosts can deserialize them from their own configuration files.
//! Defaults match the documented engine behavior.

use serde::Deserialize;

/// Tunable parameters for the dialogue engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum retained turns per session (ring buffer).
    pub turn_memory_cap: usize,

    /// Maximum context stack depth per session.
    pub context_stack_cap: usize,

    /// Sessions idle longer than this are persisted then evicted.
    pub session_max_age_hours: i64,

    /// Validity window for slots sourced from API responses.
    pub api_slot_ttl_minutes: i64,

    /// Upper bound on a single persistence load/save call.
    pub persistence_timeout_ms: u64,

    /// Per-user persona signal log cap (signals survive session eviction).
    pub persona_signal_cap: usize,

    /// Per-user retained pattern match history cap.
    pub pattern_history_cap: usize,

    /// Per-user retained suggestion history cap.
    pub suggestion_history_cap: usize,

    /// Relative adjustment applied to the pattern learning weight on
    /// recorded outcomes.
    pub learning_rate: f32,

    /// Minimum seconds between surfaced suggestions for one user.
    pub suggestion_cooldown_secs: i64,

    /// Without a stronger trigger, suggestions surface only every Nth turn.
    pub suggestion_turn_interval: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_memory_cap: 50,
            context_stack_cap: 10,
            session_max_age_hours: 24,
            api_slot_ttl_minutes: 60,
            persistence_timeout_ms: 2_000,
            persona_signal_cap: 500,
            pattern_history_cap: 100,
            suggestion_history_cap: 50,
            learning_rate: 0.05,
            suggestion_cooldown_secs: 120,
            suggestion_turn_interval: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.turn_memory_cap, 50);
        assert_eq!(config.context_stack_cap, 10);
        assert_eq!(config.session_max_age_hours, 24);
        assert_eq!(config.api_slot_ttl_minutes, 60);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "turn_memory_cap": 20 }"#).unwrap();
        assert_eq!(config.turn_memory_cap, 20);
        // Unspecified fields keep their defaults
        assert_eq!(config.context_stack_cap, 10);
    }
}
