//! Value objects shared across the dialogue engine
//!
//! These are the plain records that flow between the state store and the
//! analyzers: typed slots with provenance and validity, turn memory
//! entries, context stack frames, intent history and the optional
//! external-result context supplied by the surrounding assistant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle stage of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    /// First contact, nothing known yet
    Initial,
    /// Searching for events
    EventSearch,
    /// Looking up a speaker
    SpeakerLookup,
    /// Setting preferences
    PreferenceSetting,
    /// Registering for something
    Registration,
    /// Waiting on a clarification
    Clarification,
    /// Following up on a prior resolution
    FollowUp,
}

/// Where a slot value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotSource {
    /// Matched directly in the user's message
    UserInput,
    /// Returned by an external API call
    ApiResponse,
    /// Inferred from surrounding signals
    Inferred,
    /// Matched against a keyword table
    Keyword,
    /// Carried forward from prior conversation context
    ContextInference,
}

/// Declared value type of a slot, checked before acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// Non-empty free text
    Text,
    /// Parses as a number
    Number,
    /// One of a fixed boolean token set
    Boolean,
}

/// A named, typed, confidence-scored value extracted from user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot name, unique within a session
    pub name: String,
    /// Extracted value
    pub value: String,
    /// Extraction confidence in [0, 1]
    pub confidence: f32,
    /// When the value was set
    pub timestamp: DateTime<Utc>,
    /// Provenance of the value
    pub source: SlotSource,
}

impl Slot {
    /// Create a slot stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        confidence: f32,
        source: SlotSource,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            source,
        }
    }

    /// Whether the slot is still valid at `now`.
    ///
    /// API-sourced values expire after `api_ttl_minutes`; every other
    /// source is valid until overwritten.
    pub fn is_valid(&self, now: DateTime<Utc>, api_ttl_minutes: i64) -> bool {
        match self.source {
            SlotSource::ApiResponse => {
                now.signed_duration_since(self.timestamp) <= Duration::minutes(api_ttl_minutes)
            }
            _ => true,
        }
    }
}

/// Coarse confidence bucket for intent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Bucket a numeric confidence score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.7 {
            ConfidenceLevel::High
        } else if score > 0.4 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// One recognized intent, appended per turn and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentHistoryEntry {
    /// Recognized intent label
    pub intent: String,
    /// Confidence bucket at recognition time
    pub confidence_level: ConfidenceLevel,
    /// When the intent was recognized
    pub timestamp: DateTime<Utc>,
    /// Free-form context at recognition time
    pub context: String,
    /// Whether the intent was later resolved
    pub resolved: bool,
}

/// One user/system exchange retained in the session's turn memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// What the user said
    pub user_message: String,
    /// What the system answered
    pub system_response: String,
    /// Analysis metadata attached to the turn
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(
        user_message: impl Into<String>,
        system_response: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            user_message: user_message.into(),
            system_response: system_response.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// A frame on the session's bounded context stack, stamped on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFrame {
    /// Turn number at push time
    pub turn_number: u32,
    /// When the frame was pushed
    pub timestamp: DateTime<Utc>,
    /// Arbitrary context payload
    pub value: serde_json::Value,
}

/// Optional per-turn context supplied by the surrounding assistant after
/// it has executed tools or searches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalResultContext {
    /// How many results the external system returned
    pub result_count: Option<u32>,
    /// How many of those results were near-duplicates
    pub similar_results: Option<u32>,
    /// Diversity of the result set in [0, 1]
    pub result_diversity: Option<f32>,
    /// Names of the tools that ran this turn
    pub tools_used: Vec<String>,
}

impl ExternalResultContext {
    /// Whether a search-style tool ran and produced results.
    pub fn search_succeeded(&self) -> bool {
        self.result_count.unwrap_or(0) > 0
            && self
                .tools_used
                .iter()
                .any(|t| t.to_lowercase().contains("search"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_slot_expiry() {
        let mut slot = Slot::new("topic", "defi", 0.9, SlotSource::ApiResponse);
        let now = Utc::now();

        slot.timestamp = now - Duration::minutes(59);
        assert!(slot.is_valid(now, 60));

        slot.timestamp = now - Duration::minutes(61);
        assert!(!slot.is_valid(now, 60));
    }

    #[test]
    fn test_non_api_slot_never_expires() {
        let mut slot = Slot::new("topic", "defi", 0.8, SlotSource::UserInput);
        let now = Utc::now();
        slot.timestamp = now - Duration::days(365);
        assert!(slot.is_valid(now, 60));

        slot.source = SlotSource::ContextInference;
        assert!(slot.is_valid(now, 60));
    }

    #[test]
    fn test_confidence_level_buckets() {
        assert_eq!(ConfidenceLevel::from_score(0.9), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.2), ConfidenceLevel::Low);
    }

    #[test]
    fn test_slot_confidence_clamped() {
        let slot = Slot::new("count", "3", 1.7, SlotSource::Keyword);
        assert_eq!(slot.confidence, 1.0);
    }

    #[test]
    fn test_search_succeeded() {
        let ctx = ExternalResultContext {
            result_count: Some(12),
            tools_used: vec!["event_search".to_string()],
            ..Default::default()
        };
        assert!(ctx.search_succeeded());

        let ctx = ExternalResultContext {
            result_count: Some(0),
            tools_used: vec!["event_search".to_string()],
            ..Default::default()
        };
        assert!(!ctx.search_succeeded());
    }
}
