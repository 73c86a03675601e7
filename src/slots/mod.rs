//! Slot extraction engine
//!
//! Parses a message into typed slots in three tiers: ordered regex
//! patterns (confidence 0.8), keyword group lookup (0.7), then context
//! inference from continuation cues and external tool results (0.4–0.6).
//! Later tiers only fill slots the earlier tiers left unset, and a
//! candidate only replaces a session slot when its confidence is higher.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::EngineConfig;
use crate::session::Session;
use crate::value_objects::{ExternalResultContext, Slot, SlotSource, SlotType};

const PATTERN_CONFIDENCE: f32 = 0.8;
const KEYWORD_CONFIDENCE: f32 = 0.7;
const TOPIC_CONTINUATION_CONFIDENCE: f32 = 0.6;
const LOCATION_REFERENCE_CONFIDENCE: f32 = 0.5;
const PREFERENCE_INFERENCE_CONFIDENCE: f32 = 0.4;

/// Slot name, type, elicitation importance and its ordered patterns.
pub struct SlotDefinition {
    pub name: &'static str,
    pub slot_type: SlotType,
    /// Slots above 0.6 are worth proactively eliciting.
    pub importance: f32,
    patterns: Vec<Regex>,
}

/// The three slots that define filling progress.
const CORE_SLOTS: [&str; 3] = ["topic", "date_range", "location"];

static SLOT_DEFINITIONS: Lazy<Vec<SlotDefinition>> = Lazy::new(|| {
    vec![
        SlotDefinition {
            name: "topic",
            slot_type: SlotType::Text,
            importance: 0.9,
            patterns: compile(&[
                r"(?i)\b(?:talk about|tell me about|discuss|regarding|on the topic of)\s+([a-zA-Z][a-zA-Z0-9\- ]{1,40})",
                r"(?i)\b(?:interested in|looking for|searching for)\s+(?:some\s+)?([a-zA-Z][a-zA-Z0-9\- ]{1,40})",
                r"(?i)\blearn(?:ing)?\s+(?:more\s+)?about\s+([a-zA-Z][a-zA-Z0-9\- ]{1,40})",
            ]),
        },
        SlotDefinition {
            name: "date_range",
            slot_type: SlotType::Text,
            importance: 0.85,
            patterns: compile(&[
                r"(?i)\b(today|tonight|tomorrow|this week|next week|this weekend|next weekend|this month|next month)\b",
                r"(?i)\b(?:on|from)\s+((?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2})",
                r"\b(\d{4}-\d{2}-\d{2})\b",
            ]),
        },
        SlotDefinition {
            name: "location",
            slot_type: SlotType::Text,
            importance: 0.8,
            patterns: compile(&[
                r"(?i)\b(?:in|at|near|around)\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)\b",
                r"(?i)\b(online|virtual|remote)\b",
            ]),
        },
        SlotDefinition {
            name: "speaker",
            slot_type: SlotType::Text,
            importance: 0.7,
            patterns: compile(&[
                r"(?i)\b(?:speaker|talk by|presented by|keynote by|session with)\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)",
                r"\bwho is\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)",
            ]),
        },
        SlotDefinition {
            name: "event_type",
            slot_type: SlotType::Text,
            importance: 0.65,
            patterns: compile(&[
                r"(?i)\b(workshop|conference|meetup|hackathon|webinar|panel|summit|bootcamp)s?\b",
            ]),
        },
        SlotDefinition {
            name: "attendee_count",
            slot_type: SlotType::Number,
            importance: 0.4,
            patterns: compile(&[r"(?i)\bfor\s+(\d{1,4})\s+(?:people|attendees|guests)\b"]),
        },
    ]
});

/// Keyword groups for the keyword tier: (slot name, group value, keywords).
static KEYWORD_GROUPS: Lazy<Vec<(&'static str, &'static str, Vec<&'static str>)>> =
    Lazy::new(|| {
        vec![
            ("topic", "defi", vec!["defi", "yield farming", "staking", "liquidity", "lending protocol"]),
            ("topic", "nft", vec!["nft", "nfts", "digital art", "collectible", "collectibles", "minting"]),
            ("topic", "blockchain", vec!["blockchain", "ethereum", "bitcoin", "smart contract", "smart contracts", "wallet"]),
            ("topic", "ai", vec!["artificial intelligence", "machine learning", "llm", "neural network"]),
            ("topic", "security", vec!["security", "audit", "exploit", "vulnerability"]),
            ("location", "new york", vec!["new york", "nyc", "manhattan"]),
            ("location", "san francisco", vec!["san francisco", "bay area", "sf"]),
            ("location", "london", vec!["london"]),
            ("location", "berlin", vec!["berlin"]),
            ("location", "singapore", vec!["singapore"]),
        ]
    });

static CONTINUATION_CUES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec!["also", "what about", "how about", "more", "another", "anything else", "as well"]
});

static LOCAL_REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(here|local|locally|nearby|around here)\b").unwrap());

/// Trailing filler stripped from captured values.
static TRAILING_FILLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(instead|please|now|though|then|too)\s*$").unwrap());

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|s| Regex::new(s).expect("static slot pattern must compile"))
        .collect()
}

/// Extraction result for one turn.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Accepted slot candidates, in extraction order
    pub slots: Vec<Slot>,
    /// Filled fraction of the core slots (topic, date_range, location)
    pub progress: f32,
    /// Whether filling has reached the sufficiency threshold (>= 0.6)
    pub sufficient: bool,
    /// Highest-importance unfilled slot worth eliciting next
    pub next_slot: Option<String>,
}

/// Three-tier slot extractor.
pub struct SlotExtractor {
    config: EngineConfig,
}

impl SlotExtractor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Extract slots from one message against the session snapshot.
    ///
    /// Pure with respect to the session: candidates are returned, never
    /// written back here.
    pub fn extract(
        &self,
        message: &str,
        session: &Session,
        external: Option<&ExternalResultContext>,
        now: DateTime<Utc>,
    ) -> ExtractionOutcome {
        let mut extracted: Vec<Slot> = Vec::new();

        self.pattern_tier(message, &mut extracted);
        self.keyword_tier(message, &mut extracted);
        self.context_tier(message, session, external, now, &mut extracted);

        // A candidate only survives if the session has no valid value for
        // the name, or ours is strictly more confident. Context inference
        // re-affirming the stored value is carry-forward, not an overwrite,
        // and always passes so continuations stay visible to callers.
        let ttl = self.config.api_slot_ttl_minutes;
        extracted.retain(|candidate| {
            session
                .get_slot(&candidate.name, now, ttl)
                .map(|existing| {
                    candidate.confidence > existing.confidence
                        || (candidate.source == SlotSource::ContextInference
                            && candidate.value == existing.value)
                })
                .unwrap_or(true)
        });

        let filled = |name: &str| -> bool {
            session.get_slot(name, now, ttl).is_some()
                || extracted.iter().any(|s| s.name == name)
        };

        let progress =
            CORE_SLOTS.iter().filter(|s| filled(s)).count() as f32 / CORE_SLOTS.len() as f32;

        let next_slot = SLOT_DEFINITIONS
            .iter()
            .filter(|def| def.importance > 0.6)
            .find(|def| !filled(def.name))
            .map(|def| def.name.to_string());

        ExtractionOutcome {
            slots: extracted,
            progress,
            sufficient: progress >= 0.6,
            next_slot,
        }
    }

    /// Tier 1: ordered regexes per definition, first match wins.
    fn pattern_tier(&self, message: &str, out: &mut Vec<Slot>) {
        for def in SLOT_DEFINITIONS.iter() {
            if out.iter().any(|s| s.name == def.name) {
                continue;
            }
            for pattern in &def.patterns {
                let Some(caps) = pattern.captures(message) else {
                    continue;
                };
                let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let value = clean_value(raw);
                match validate(&value, def.slot_type) {
                    Ok(value) => {
                        out.push(Slot::new(
                            def.name,
                            value,
                            PATTERN_CONFIDENCE,
                            SlotSource::UserInput,
                        ));
                    }
                    Err(reason) => {
                        debug!(slot = def.name, %reason, "dropping invalid slot candidate");
                    }
                }
                break;
            }
        }
    }

    /// Tier 2: keyword group lookup, filling only still-unset names.
    fn keyword_tier(&self, message: &str, out: &mut Vec<Slot>) {
        let lowered = message.to_lowercase();
        for (name, value, keywords) in KEYWORD_GROUPS.iter() {
            if out.iter().any(|s| s.name == *name) {
                continue;
            }
            if keywords.iter().any(|kw| contains_word(&lowered, kw)) {
                out.push(Slot::new(
                    *name,
                    *value,
                    KEYWORD_CONFIDENCE,
                    SlotSource::Keyword,
                ));
            }
        }
    }

    /// Tier 3: carry prior context forward on continuation cues, and
    /// infer a preference when an external search succeeded.
    fn context_tier(
        &self,
        message: &str,
        session: &Session,
        external: Option<&ExternalResultContext>,
        now: DateTime<Utc>,
        out: &mut Vec<Slot>,
    ) {
        let lowered = message.to_lowercase();
        let ttl = self.config.api_slot_ttl_minutes;
        let has_cue = CONTINUATION_CUES.iter().any(|cue| lowered.contains(cue));

        if has_cue && !out.iter().any(|s| s.name == "topic") {
            if let Some(prior) = session.get_slot("topic", now, ttl) {
                out.push(Slot::new(
                    "topic",
                    prior.value.clone(),
                    TOPIC_CONTINUATION_CONFIDENCE,
                    SlotSource::ContextInference,
                ));
            }
        }

        if LOCAL_REFERENCES.is_match(&lowered) && !out.iter().any(|s| s.name == "location") {
            if let Some(prior) = session.get_slot("location", now, ttl) {
                out.push(Slot::new(
                    "location",
                    prior.value.clone(),
                    LOCATION_REFERENCE_CONFIDENCE,
                    SlotSource::ContextInference,
                ));
            }
        }

        if let Some(external) = external {
            if external.search_succeeded() && !out.iter().any(|s| s.name == "preference") {
                let topic = out
                    .iter()
                    .find(|s| s.name == "topic")
                    .map(|s| s.value.clone())
                    .or_else(|| session.get_slot("topic", now, ttl).map(|s| s.value.clone()))
                    .unwrap_or_else(|| "search_results".to_string());
                out.push(Slot::new(
                    "preference",
                    topic,
                    PREFERENCE_INFERENCE_CONFIDENCE,
                    SlotSource::Inferred,
                ));
            }
        }
    }
}

/// Validate a candidate value against its declared type.
fn validate(value: &str, slot_type: SlotType) -> Result<String, String> {
    let trimmed = value.trim();
    match slot_type {
        SlotType::Text => {
            if trimmed.is_empty() {
                Err("empty text value".to_string())
            } else {
                Ok(trimmed.to_string())
            }
        }
        SlotType::Number => {
            if trimmed.parse::<f64>().is_ok() {
                Ok(trimmed.to_string())
            } else {
                Err(format!("'{trimmed}' is not numeric"))
            }
        }
        SlotType::Boolean => {
            let token = trimmed.to_lowercase();
            if matches!(token.as_str(), "true" | "false" | "yes" | "no" | "on" | "off") {
                Ok(token)
            } else {
                Err(format!("'{trimmed}' is not a boolean token"))
            }
        }
    }
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(['.', ',', '!', '?']);
    TRAILING_FILLER.replace(trimmed, "").to_lowercase()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(idx, _)| {
            let before_ok = idx == 0
                || !haystack[..idx]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric());
            let after = idx + needle.len();
            let after_ok = after >= haystack.len()
                || !haystack[after..].chars().next().is_some_and(|c| c.is_alphanumeric());
            before_ok && after_ok
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SlotExtractor {
        SlotExtractor::new(EngineConfig::default())
    }

    fn slot<'a>(outcome: &'a ExtractionOutcome, name: &str) -> Option<&'a Slot> {
        outcome.slots.iter().find(|s| s.name == name)
    }

    #[test]
    fn test_pattern_tier_topic() {
        let session = Session::new("u1");
        let outcome = extractor().extract(
            "I'm interested in defi lending this weekend",
            &session,
            None,
            Utc::now(),
        );
        let topic = slot(&outcome, "topic").unwrap();
        assert_eq!(topic.confidence, 0.8);
        assert_eq!(topic.source, SlotSource::UserInput);
        assert!(topic.value.starts_with("defi"));

        let date = slot(&outcome, "date_range").unwrap();
        assert_eq!(date.value, "this weekend");
    }

    #[test]
    fn test_keyword_tier_fills_unset_only() {
        let session = Session::new("u1");
        let outcome = extractor().extract("any nft meetups in Berlin?", &session, None, Utc::now());

        let topic = slot(&outcome, "topic").unwrap();
        assert_eq!(topic.value, "nft");
        assert_eq!(topic.confidence, 0.7);
        assert_eq!(topic.source, SlotSource::Keyword);
        assert_eq!(slot(&outcome, "event_type").unwrap().value, "meetup");
    }

    #[test]
    fn test_context_tier_topic_continuation() {
        let mut session = Session::new("u1");
        session.set_slot(Slot::new("topic", "defi", 0.8, SlotSource::UserInput));

        let outcome = extractor().extract("what about next week?", &session, None, Utc::now());
        let topic = slot(&outcome, "topic").unwrap();
        assert_eq!(topic.value, "defi");
        assert_eq!(topic.confidence, 0.6);
        assert_eq!(topic.source, SlotSource::ContextInference);
    }

    #[test]
    fn test_context_tier_local_reference() {
        let mut session = Session::new("u1");
        session.set_slot(Slot::new("location", "berlin", 0.8, SlotSource::UserInput));

        let outcome = extractor().extract("anything happening here?", &session, None, Utc::now());
        let location = slot(&outcome, "location").unwrap();
        assert_eq!(location.value, "berlin");
        assert_eq!(location.confidence, 0.5);
    }

    #[test]
    fn test_preference_inferred_from_search() {
        let mut session = Session::new("u1");
        session.set_slot(Slot::new("topic", "defi", 0.8, SlotSource::UserInput));
        let external = ExternalResultContext {
            result_count: Some(15),
            tools_used: vec!["event_search".to_string()],
            ..Default::default()
        };

        let outcome = extractor().extract("show me more", &session, Some(&external), Utc::now());
        let pref = slot(&outcome, "preference").unwrap();
        assert_eq!(pref.confidence, 0.4);
        assert_eq!(pref.source, SlotSource::Inferred);
        assert_eq!(pref.value, "defi");
    }

    #[test]
    fn test_lower_confidence_does_not_downgrade() {
        let mut session = Session::new("u1");
        session.set_slot(Slot::new("topic", "defi", 0.8, SlotSource::UserInput));

        // Keyword tier would re-extract "nft" at 0.7, below the existing 0.8
        let outcome = extractor().extract("nfts", &session, None, Utc::now());
        assert!(slot(&outcome, "topic").is_none());
    }

    #[test]
    fn test_progress_and_next_slot() {
        let session = Session::new("u1");
        let outcome = extractor().extract(
            "looking for defi workshops in Berlin this weekend",
            &session,
            None,
            Utc::now(),
        );
        assert!((outcome.progress - 1.0).abs() < f32::EPSILON);
        assert!(outcome.sufficient);
        assert_eq!(outcome.next_slot.as_deref(), Some("speaker"));

        let outcome = extractor().extract("hello there", &session, None, Utc::now());
        assert_eq!(outcome.progress, 0.0);
        assert!(!outcome.sufficient);
        assert_eq!(outcome.next_slot.as_deref(), Some("topic"));
    }

    #[test]
    fn test_number_validation_rejects_garbage() {
        assert!(validate("12", SlotType::Number).is_ok());
        assert!(validate("dozens", SlotType::Number).is_err());
        assert!(validate("yes", SlotType::Boolean).is_ok());
        assert!(validate("perhaps", SlotType::Boolean).is_err());
        assert!(validate("   ", SlotType::Text).is_err());
    }

    #[test]
    fn test_trailing_filler_stripped() {
        let session = Session::new("u1");
        let outcome = extractor().extract(
            "Let's talk about NFTs instead",
            &session,
            None,
            Utc::now(),
        );
        assert_eq!(slot(&outcome, "topic").unwrap().value, "nfts");
    }
}
