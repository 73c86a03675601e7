//! Persona model
//!
//! Accumulates weighted behavioral signals per user and derives a
//! probabilistic persona classification from the full, time-decayed
//! signal history on every update. Signals are append-only and survive
//! session eviction; the derived fields have no other mutation path.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EngineConfig;
use crate::session::Session;

/// Daily exponential decay rate applied to signal weight.
const DECAY_RATE: f64 = 0.1;

/// Behavioral archetypes a user can be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaType {
    TechnicalExpert,
    Investor,
    Student,
    Researcher,
    BusinessProfessional,
    Networker,
    CasualExplorer,
    EventOrganizer,
}

impl PersonaType {
    pub const ALL: [PersonaType; 8] = [
        PersonaType::TechnicalExpert,
        PersonaType::Investor,
        PersonaType::Student,
        PersonaType::Researcher,
        PersonaType::BusinessProfessional,
        PersonaType::Networker,
        PersonaType::CasualExplorer,
        PersonaType::EventOrganizer,
    ];

    /// Personas that favor unsolicited learning suggestions.
    pub fn is_learning_oriented(&self) -> bool {
        matches!(
            self,
            PersonaType::Student | PersonaType::Researcher | PersonaType::CasualExplorer
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Novice,
    Intermediate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStyle {
    Focused,
    Exploratory,
    Social,
    TaskOriented,
}

/// Kinds of evidence the extractor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    TechnicalTerminology,
    InvestmentLanguage,
    LearningIndicator,
    ProfessionalContext,
    NetworkingInterest,
    QuestionComplexity,
    FollowUpPattern,
    SessionIntensity,
}

/// One piece of behavioral evidence, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSignal {
    pub signal_type: SignalType,
    /// Matched terms or the derived bucket label
    pub value: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    /// Where the signal came from ("message", "intent_history", "cadence")
    pub source: String,
    /// Family weight, fixed per signal type
    pub weight: f32,
}

/// Derived persona classification for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub user_id: String,
    pub primary_persona: PersonaType,
    /// Share of the winning persona's score in the total, in [0, 1]
    pub persona_confidence: f32,
    pub experience_level: ExperienceLevel,
    pub engagement_style: EngagementStyle,
    pub interests: Vec<String>,
    pub expertise_areas: Vec<String>,
    pub signals: Vec<PersonaSignal>,
}

impl Persona {
    /// Neutral persona for a user with no observed signals.
    pub fn neutral(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            primary_persona: PersonaType::CasualExplorer,
            persona_confidence: 0.0,
            experience_level: ExperienceLevel::Novice,
            engagement_style: EngagementStyle::Exploratory,
            interests: Vec::new(),
            expertise_areas: Vec::new(),
            signals: Vec::new(),
        }
    }
}

/// Keyword family: signal type, fixed weight, vocabulary.
struct SignalFamily {
    signal_type: SignalType,
    weight: f32,
    vocabulary: Vec<&'static str>,
}

static SIGNAL_FAMILIES: Lazy<Vec<SignalFamily>> = Lazy::new(|| {
    vec![
        SignalFamily {
            signal_type: SignalType::TechnicalTerminology,
            weight: 0.8,
            vocabulary: vec![
                "smart contract", "protocol", "consensus", "gas fees", "solidity", "evm",
                "layer 2", "zero knowledge", "rollup", "validator", "node", "sdk", "api",
                "cryptography", "merkle",
            ],
        },
        SignalFamily {
            signal_type: SignalType::InvestmentLanguage,
            weight: 0.8,
            vocabulary: vec![
                "roi", "yield", "apy", "portfolio", "invest", "investing", "liquidity",
                "market cap", "token price", "returns", "allocation", "bull", "bear",
            ],
        },
        SignalFamily {
            signal_type: SignalType::LearningIndicator,
            weight: 0.7,
            vocabulary: vec![
                "learn", "how does", "what is", "beginner", "tutorial", "explain",
                "new to", "getting started", "understand", "basics",
            ],
        },
        SignalFamily {
            signal_type: SignalType::ProfessionalContext,
            weight: 0.7,
            vocabulary: vec![
                "my company", "our team", "client", "enterprise", "business", "startup",
                "we're building", "hiring", "partnership", "vendor",
            ],
        },
        SignalFamily {
            signal_type: SignalType::NetworkingInterest,
            weight: 0.6,
            vocabulary: vec![
                "meet", "network", "networking", "connect", "community", "introduce",
                "collaborate", "like-minded",
            ],
        },
    ]
});

/// Fixed mapping from a signal onto persona score shares.
fn affinities(signal: &PersonaSignal) -> Vec<(PersonaType, f32)> {
    match signal.signal_type {
        SignalType::TechnicalTerminology => vec![
            (PersonaType::TechnicalExpert, 1.0),
            (PersonaType::Researcher, 0.3),
        ],
        SignalType::InvestmentLanguage => vec![
            (PersonaType::Investor, 1.0),
            (PersonaType::BusinessProfessional, 0.3),
        ],
        SignalType::LearningIndicator => vec![
            (PersonaType::Student, 1.0),
            (PersonaType::CasualExplorer, 0.4),
        ],
        SignalType::ProfessionalContext => vec![
            (PersonaType::BusinessProfessional, 1.0),
            (PersonaType::EventOrganizer, 0.3),
        ],
        SignalType::NetworkingInterest => vec![
            (PersonaType::Networker, 1.0),
            (PersonaType::BusinessProfessional, 0.2),
        ],
        SignalType::QuestionComplexity => match signal.value.as_str() {
            "complex" => vec![
                (PersonaType::TechnicalExpert, 0.5),
                (PersonaType::Researcher, 0.5),
            ],
            "simple" => vec![(PersonaType::CasualExplorer, 0.5)],
            _ => vec![],
        },
        SignalType::FollowUpPattern => match signal.value.as_str() {
            "deep_dive" => vec![
                (PersonaType::Researcher, 0.6),
                (PersonaType::TechnicalExpert, 0.3),
            ],
            "broad_exploration" => vec![
                (PersonaType::CasualExplorer, 0.5),
                (PersonaType::Student, 0.3),
            ],
            _ => vec![],
        },
        SignalType::SessionIntensity => match signal.value.as_str() {
            "high" => vec![(PersonaType::EventOrganizer, 0.2)],
            "low" => vec![(PersonaType::CasualExplorer, 0.2)],
            _ => vec![],
        },
    }
}

/// Decayed effective weight of a signal at `now`.
pub fn effective_weight(signal: &PersonaSignal, now: DateTime<Utc>) -> f32 {
    let days = now
        .signed_duration_since(signal.timestamp)
        .num_seconds()
        .max(0) as f64
        / 86_400.0;
    (signal.confidence as f64 * signal.weight as f64 * (-DECAY_RATE * days).exp()) as f32
}

/// Scan one message plus the session snapshot for behavioral signals.
pub fn extract_signals(message: &str, session: &Session, now: DateTime<Utc>) -> Vec<PersonaSignal> {
    let lowered = message.to_lowercase();
    let mut signals = Vec::new();

    let mut technical_hits = 0usize;
    for family in SIGNAL_FAMILIES.iter() {
        let matched: Vec<&str> = family
            .vocabulary
            .iter()
            .copied()
            .filter(|term| lowered.contains(term))
            .collect();
        if matched.is_empty() {
            continue;
        }
        if family.signal_type == SignalType::TechnicalTerminology {
            technical_hits = matched.len();
        }
        signals.push(PersonaSignal {
            signal_type: family.signal_type,
            value: matched.join(","),
            confidence: (0.5 + 0.15 * matched.len() as f32).min(1.0),
            timestamp: now,
            source: "message".to_string(),
            weight: family.weight,
        });
    }

    // Question complexity from length and technical density
    let words = lowered.split_whitespace().count();
    let complexity = if words > 25 || technical_hits >= 3 {
        "complex"
    } else if words >= 10 || technical_hits >= 1 {
        "moderate"
    } else {
        "simple"
    };
    signals.push(PersonaSignal {
        signal_type: SignalType::QuestionComplexity,
        value: complexity.to_string(),
        confidence: 0.7,
        timestamp: now,
        source: "message".to_string(),
        weight: 0.6,
    });

    // Follow-up pattern over the last 5 recognized intents
    let recent: Vec<&str> = session
        .intent_history
        .iter()
        .rev()
        .take(5)
        .map(|e| e.intent.as_str())
        .collect();
    if recent.len() >= 3 {
        let distinct: std::collections::HashSet<&str> = recent.iter().copied().collect();
        let value = if distinct.len() == 1 {
            Some("deep_dive")
        } else if distinct.len() >= 3 {
            Some("broad_exploration")
        } else {
            None
        };
        if let Some(value) = value {
            signals.push(PersonaSignal {
                signal_type: SignalType::FollowUpPattern,
                value: value.to_string(),
                confidence: 0.6,
                timestamp: now,
                source: "intent_history".to_string(),
                weight: 0.7,
            });
        }
    }

    // Session intensity from turn cadence
    if session.turn_count >= 2 {
        let tpm = session.turns_per_minute(now);
        let value = if tpm > 2.0 {
            "high"
        } else if tpm > 1.0 {
            "moderate"
        } else {
            "low"
        };
        signals.push(PersonaSignal {
            signal_type: SignalType::SessionIntensity,
            value: value.to_string(),
            confidence: 0.6,
            timestamp: now,
            source: "cadence".to_string(),
            weight: 0.6,
        });
    }

    signals
}

/// Recompute the persona from the full signal history.
pub fn derive_persona(user_id: &str, signals: &[PersonaSignal], now: DateTime<Utc>) -> Persona {
    let mut scores: HashMap<PersonaType, f32> = HashMap::new();
    let mut technical_mass = 0.0f32;
    let mut networking_mass = 0.0f32;
    let mut professional_mass = 0.0f32;
    let mut deep_mass = 0.0f32;
    let mut broad_mass = 0.0f32;
    let mut interests: Vec<String> = Vec::new();
    let mut expertise: Vec<String> = Vec::new();

    for signal in signals {
        let effective = effective_weight(signal, now);
        for (persona, share) in affinities(signal) {
            *scores.entry(persona).or_insert(0.0) += effective * share;
        }
        match signal.signal_type {
            SignalType::TechnicalTerminology => {
                technical_mass += effective;
                for term in signal.value.split(',') {
                    if !term.is_empty() && !expertise.iter().any(|t| t == term) {
                        expertise.push(term.to_string());
                    }
                }
            }
            SignalType::NetworkingInterest => networking_mass += effective,
            SignalType::ProfessionalContext => professional_mass += effective,
            SignalType::FollowUpPattern => {
                if signal.value == "deep_dive" {
                    deep_mass += effective;
                } else {
                    broad_mass += effective;
                }
            }
            SignalType::InvestmentLanguage | SignalType::LearningIndicator => {
                for term in signal.value.split(',') {
                    if !term.is_empty() && !interests.iter().any(|t| t == term) {
                        interests.push(term.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let total: f32 = scores.values().sum();
    let (primary, top_score) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(p, s)| (*p, *s))
        .unwrap_or((PersonaType::CasualExplorer, 0.0));

    let persona_confidence = if total > 0.0 { top_score / total } else { 0.0 };

    let experience_level = if technical_mass >= 2.0 {
        ExperienceLevel::Expert
    } else if technical_mass >= 1.0 {
        ExperienceLevel::Advanced
    } else if technical_mass >= 0.4 {
        ExperienceLevel::Intermediate
    } else {
        ExperienceLevel::Novice
    };

    let engagement_style = [
        (EngagementStyle::Focused, deep_mass),
        (EngagementStyle::Exploratory, broad_mass),
        (EngagementStyle::Social, networking_mass),
        (EngagementStyle::TaskOriented, professional_mass),
    ]
    .into_iter()
    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    .filter(|(_, mass)| *mass > 0.0)
    .map(|(style, _)| style)
    .unwrap_or(EngagementStyle::Exploratory);

    Persona {
        user_id: user_id.to_string(),
        primary_persona: primary,
        persona_confidence: persona_confidence.clamp(0.0, 1.0),
        experience_level,
        engagement_style,
        interests,
        expertise_areas: expertise,
        signals: signals.to_vec(),
    }
}

/// Per-user signal store plus derivation.
pub struct PersonaModel {
    signals: RwLock<HashMap<String, VecDeque<PersonaSignal>>>,
    config: EngineConfig,
}

impl PersonaModel {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Observe one message: extract signals, append them to the user's
    /// bounded log, and return the recomputed persona.
    pub async fn observe(
        &self,
        user_id: &str,
        message: &str,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Persona {
        let new_signals = extract_signals(message, session, now);
        debug!(user_id, count = new_signals.len(), "persona signals extracted");

        let mut store = self.signals.write().await;
        let log = store.entry(user_id.to_string()).or_default();
        for signal in new_signals {
            log.push_back(signal);
            while log.len() > self.config.persona_signal_cap {
                log.pop_front();
            }
        }
        derive_persona(user_id, log.make_contiguous(), now)
    }

    /// Current persona without observing anything new.
    pub async fn get(&self, user_id: &str, now: DateTime<Utc>) -> Persona {
        let store = self.signals.read().await;
        match store.get(user_id) {
            Some(log) => {
                let signals: Vec<PersonaSignal> = log.iter().cloned().collect();
                derive_persona(user_id, &signals, now)
            }
            None => Persona::neutral(user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signal(signal_type: SignalType, value: &str, age_days: i64) -> PersonaSignal {
        PersonaSignal {
            signal_type,
            value: value.to_string(),
            confidence: 0.8,
            timestamp: Utc::now() - Duration::days(age_days),
            source: "message".to_string(),
            weight: 0.8,
        }
    }

    #[test]
    fn test_confidence_bounds() {
        let persona = derive_persona("u1", &[], Utc::now());
        assert_eq!(persona.persona_confidence, 0.0);

        let signals = vec![signal(SignalType::TechnicalTerminology, "protocol", 0)];
        let persona = derive_persona("u1", &signals, Utc::now());
        assert!(persona.persona_confidence > 0.0);
        assert!(persona.persona_confidence <= 1.0);
        assert_eq!(persona.primary_persona, PersonaType::TechnicalExpert);
    }

    #[test]
    fn test_decay_prefers_recent_signals() {
        let now = Utc::now();
        let old = signal(SignalType::TechnicalTerminology, "protocol", 60);
        let recent = signal(SignalType::InvestmentLanguage, "yield", 0);

        let persona = derive_persona("u1", &[old, recent], now);
        // Sixty days of decay leaves the technical signal far behind
        assert_eq!(persona.primary_persona, PersonaType::Investor);
    }

    #[test]
    fn test_effective_weight_decay() {
        let now = Utc::now();
        let fresh = signal(SignalType::TechnicalTerminology, "protocol", 0);
        let aged = signal(SignalType::TechnicalTerminology, "protocol", 10);
        let fresh_w = effective_weight(&fresh, now);
        let aged_w = effective_weight(&aged, now);
        assert!(fresh_w > aged_w);
        // exp(-0.1 * 10) ≈ 0.368
        assert!((aged_w / fresh_w - 0.368).abs() < 0.01);
    }

    #[test]
    fn test_extract_signal_families() {
        let session = Session::new("u1");
        let signals = extract_signals(
            "How does the smart contract protocol handle gas fees?",
            &session,
            Utc::now(),
        );
        assert!(signals
            .iter()
            .any(|s| s.signal_type == SignalType::TechnicalTerminology && s.weight == 0.8));
        assert!(signals
            .iter()
            .any(|s| s.signal_type == SignalType::LearningIndicator));
        // Three technical hits push complexity to complex
        let complexity = signals
            .iter()
            .find(|s| s.signal_type == SignalType::QuestionComplexity)
            .unwrap();
        assert_eq!(complexity.value, "complex");
    }

    #[test]
    fn test_expertise_accumulates() {
        let signals = vec![
            signal(SignalType::TechnicalTerminology, "protocol,rollup", 0),
            signal(SignalType::TechnicalTerminology, "protocol,validator", 0),
        ];
        let persona = derive_persona("u1", &signals, Utc::now());
        assert_eq!(persona.expertise_areas, vec!["protocol", "rollup", "validator"]);
        assert!(persona.experience_level >= ExperienceLevel::Intermediate);
    }

    #[tokio::test]
    async fn test_signal_log_bounded() {
        let config = EngineConfig {
            persona_signal_cap: 10,
            ..Default::default()
        };
        let model = PersonaModel::new(config);
        let session = Session::new("u1");
        for _ in 0..30 {
            model
                .observe("u1", "how does the protocol work", &session, Utc::now())
                .await;
        }
        let persona = model.get("u1", Utc::now()).await;
        assert!(persona.signals.len() <= 10);
    }
}
