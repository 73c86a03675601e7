//! Conversational pattern recognizer
//!
//! Scores the recent turn window against eight pattern archetypes. Each
//! variant requires a minimum turn count, computes a handful of indicator
//! scores and fuses them into a clamped confidence; matches below 0.3 are
//! discarded and only the top three survive. Matched patterns are appended
//! to a bounded per-user history used for a small historical bonus and for
//! outcome-driven learning.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EngineConfig;
use crate::session::Session;

/// Conversational archetypes inferred from the turn window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPattern {
    DeepDive,
    BroadExploration,
    ComparisonShopping,
    ClarificationCascade,
    TaskFocused,
    SocialExploration,
    ReturnVisitor,
    RapidFire,
}

/// Direction of message complexity across the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// One recognized pattern, produced fresh per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: ConversationPattern,
    pub confidence: f32,
    /// Which indicators fired and how strongly
    pub evidence: Vec<String>,
    /// Turn numbers covered by the window
    pub turns_observed: Vec<u32>,
    /// Wall-clock span of the window
    pub duration_minutes: f32,
    /// Dominant-topic share across the window, in [0, 1]
    pub topic_consistency: f32,
    pub complexity_trend: ComplexityTrend,
}

/// Scope of the outcome-learning weight.
///
/// The observed behavior adjusts one shared weight; the scope is explicit
/// so hosts can narrow it without touching the recognizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningScope {
    Global,
    PerUser,
    PerPattern,
}

/// Outcome-driven weight applied to the historical bonus.
#[derive(Debug, Clone)]
pub struct PatternLearning {
    scope: LearningScope,
    rate: f32,
    global_weight: f32,
    per_user: HashMap<String, f32>,
    per_pattern: HashMap<ConversationPattern, f32>,
}

impl PatternLearning {
    pub fn new(scope: LearningScope, rate: f32) -> Self {
        Self {
            scope,
            rate,
            global_weight: 1.0,
            per_user: HashMap::new(),
            per_pattern: HashMap::new(),
        }
    }

    /// Current weight for a user/pattern combination.
    pub fn weight(&self, user_id: &str, pattern: ConversationPattern) -> f32 {
        match self.scope {
            LearningScope::Global => self.global_weight,
            LearningScope::PerUser => *self.per_user.get(user_id).unwrap_or(&1.0),
            LearningScope::PerPattern => *self.per_pattern.get(&pattern).unwrap_or(&1.0),
        }
    }

    /// Adjust the scoped weight by the learning rate.
    pub fn record_outcome(&mut self, user_id: &str, pattern: ConversationPattern, success: bool) {
        let factor = if success {
            1.0 + self.rate
        } else {
            1.0 - self.rate
        };
        match self.scope {
            LearningScope::Global => {
                self.global_weight = (self.global_weight * factor).clamp(0.5, 2.0);
            }
            LearningScope::PerUser => {
                let w = self.per_user.entry(user_id.to_string()).or_insert(1.0);
                *w = (*w * factor).clamp(0.5, 2.0);
            }
            LearningScope::PerPattern => {
                let w = self.per_pattern.entry(pattern).or_insert(1.0);
                *w = (*w * factor).clamp(0.5, 2.0);
            }
        }
    }
}

/// Topic vocabulary used for consistency and similarity analysis.
pub static TOPIC_VOCABULARY: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "defi", "nft", "nfts", "blockchain", "crypto", "ethereum", "bitcoin", "wallet",
        "token", "tokens", "dao", "staking", "trading", "yield", "metaverse", "gaming",
        "security", "conference", "workshop", "meetup", "hackathon", "speaker", "event",
        "events", "networking", "ai", "art", "collectibles", "finance",
    ]
});

/// Topic keywords present in a message, lowercased.
pub fn topic_keywords(message: &str) -> Vec<String> {
    let lowered = message.to_lowercase();
    TOPIC_VOCABULARY
        .iter()
        .filter(|kw| {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|tok| tok == **kw)
        })
        .map(|kw| kw.to_string())
        .collect()
}

static REFERENCE_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tell me more|go deeper|more detail|in depth|you mentioned|earlier|further|dig into)\b",
    )
    .unwrap()
});

static COMPARISON_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(vs|versus|compare|comparison|difference|better|worse|which one)\b").unwrap()
});

static CLARIFICATION_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(what do you mean|don't understand|do not understand|confused|can you explain|unclear|huh|come again)\b",
    )
    .unwrap()
});

static ACTION_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(register|book|sign up|signup|buy|schedule|rsvp|reserve|find me|get me)\b")
        .unwrap()
});

static SOCIAL_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(meet|people|network|networking|community|connect|who else|friends)\b")
        .unwrap()
});

static RETURNING_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(last time|again|back to|previously|as before|remember when|like before)\b")
        .unwrap()
});

/// Per-variant tuning: minimum turns, consistency threshold, and whether
/// the variant expects consistency at or above that threshold.
struct VariantProfile {
    pattern: ConversationPattern,
    min_turns: u32,
    consistency_threshold: f32,
    expects_high_consistency: bool,
}

const VARIANTS: [VariantProfile; 8] = [
    VariantProfile {
        pattern: ConversationPattern::DeepDive,
        min_turns: 3,
        consistency_threshold: 0.7,
        expects_high_consistency: true,
    },
    VariantProfile {
        pattern: ConversationPattern::BroadExploration,
        min_turns: 3,
        consistency_threshold: 0.3,
        expects_high_consistency: false,
    },
    VariantProfile {
        pattern: ConversationPattern::ComparisonShopping,
        min_turns: 2,
        consistency_threshold: 0.5,
        expects_high_consistency: true,
    },
    VariantProfile {
        pattern: ConversationPattern::ClarificationCascade,
        min_turns: 2,
        consistency_threshold: 0.4,
        expects_high_consistency: true,
    },
    VariantProfile {
        pattern: ConversationPattern::TaskFocused,
        min_turns: 2,
        consistency_threshold: 0.6,
        expects_high_consistency: true,
    },
    VariantProfile {
        pattern: ConversationPattern::SocialExploration,
        min_turns: 2,
        consistency_threshold: 0.4,
        expects_high_consistency: false,
    },
    VariantProfile {
        pattern: ConversationPattern::ReturnVisitor,
        min_turns: 2,
        consistency_threshold: 0.5,
        expects_high_consistency: true,
    },
    VariantProfile {
        pattern: ConversationPattern::RapidFire,
        min_turns: 5,
        consistency_threshold: 0.3,
        expects_high_consistency: false,
    },
];

/// The analysis window: recent user messages plus the current one.
struct Window {
    messages: Vec<String>,
    turn_numbers: Vec<u32>,
    duration_minutes: f32,
}

fn build_window(session: &Session, message: &str, now: DateTime<Utc>) -> Window {
    // Nine stored turns plus the current message: a ten-turn window
    let recent = session.recent_turns(9);
    let mut messages: Vec<String> = recent.iter().map(|t| t.user_message.clone()).collect();
    let first_ts = recent.first().map(|t| t.timestamp).unwrap_or(now);
    messages.push(message.to_string());

    let start = session.turn_count.saturating_sub(recent.len() as u32);
    let turn_numbers: Vec<u32> = (start..=session.turn_count).collect();

    Window {
        messages,
        turn_numbers,
        duration_minutes: now.signed_duration_since(first_ts).num_seconds().max(0) as f32 / 60.0,
    }
}

fn word_count(message: &str) -> usize {
    message.split_whitespace().count()
}

/// Dominant-topic share across the window, 0.0 when no topic keywords.
fn window_consistency(window: &Window) -> f32 {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for msg in &window.messages {
        for kw in topic_keywords(msg) {
            *counts.entry(kw).or_insert(0) += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f32 / total as f32
}

fn complexity_trend(window: &Window) -> ComplexityTrend {
    if window.messages.len() < 2 {
        return ComplexityTrend::Stable;
    }
    let counts: Vec<f32> = window.messages.iter().map(|m| word_count(m) as f32).collect();
    let half = counts.len() / 2;
    let early: f32 = counts[..half.max(1)].iter().sum::<f32>() / half.max(1) as f32;
    let late: f32 = counts[half..].iter().sum::<f32>() / (counts.len() - half) as f32;
    if late > early * 1.1 {
        ComplexityTrend::Increasing
    } else if late < early * 0.9 {
        ComplexityTrend::Decreasing
    } else {
        ComplexityTrend::Stable
    }
}

fn question_rate(window: &Window) -> f32 {
    let questions = window.messages.iter().filter(|m| m.contains('?')).count();
    questions as f32 / window.messages.len().max(1) as f32
}

fn regex_hit_score(pattern: &Regex, messages: &[String], per_hit: f32) -> f32 {
    let hits: usize = messages.iter().map(|m| pattern.find_iter(m).count()).sum();
    (hits as f32 * per_hit).min(1.0)
}

/// Indicator scores for one variant; empty means the variant does not
/// apply to this window at all.
fn indicators(
    profile: &VariantProfile,
    session: &Session,
    window: &Window,
    now: DateTime<Utc>,
) -> Vec<(&'static str, f32)> {
    let messages = &window.messages;
    match profile.pattern {
        ConversationPattern::DeepDive => {
            let last3: Vec<String> = messages.iter().rev().take(3).cloned().collect();
            let continuity = {
                let with_topic = last3
                    .iter()
                    .filter(|m| !topic_keywords(m).is_empty())
                    .count();
                let mut counts: HashMap<String, usize> = HashMap::new();
                for m in &last3 {
                    for kw in topic_keywords(m) {
                        *counts.entry(kw).or_insert(0) += 1;
                    }
                }
                let dominant = counts.values().copied().max().unwrap_or(0);
                if with_topic == 0 {
                    0.0
                } else {
                    dominant as f32 / with_topic as f32
                }
            };
            let complexity = match complexity_trend(window) {
                ComplexityTrend::Increasing => 1.0,
                ComplexityTrend::Stable => 0.5,
                ComplexityTrend::Decreasing => 0.2,
            };
            let references = regex_hit_score(&REFERENCE_PATTERNS, messages, 0.5);
            vec![
                ("topic_continuity", continuity.min(1.0)),
                ("complexity_delta", complexity),
                ("references_to_previous", references),
            ]
        }
        ConversationPattern::BroadExploration => {
            let mut counts: HashMap<String, usize> = HashMap::new();
            let mut total = 0usize;
            for m in messages {
                for kw in topic_keywords(m) {
                    *counts.entry(kw).or_insert(0) += 1;
                    total += 1;
                }
            }
            let variety = if total == 0 {
                0.0
            } else {
                counts.len() as f32 / total as f32
            };
            let novelty = {
                let prior: Vec<String> = messages[..messages.len() - 1]
                    .iter()
                    .flat_map(|m| topic_keywords(m))
                    .collect();
                let current = topic_keywords(messages.last().map(String::as_str).unwrap_or(""));
                if current.iter().any(|kw| !prior.contains(kw)) {
                    1.0
                } else {
                    0.0
                }
            };
            vec![
                ("topic_variety", variety),
                ("question_rate", question_rate(window)),
                ("topic_novelty", novelty),
            ]
        }
        ConversationPattern::ComparisonShopping => {
            let comparisons = regex_hit_score(&COMPARISON_PATTERNS, messages, 0.4);
            let alternatives = {
                let count: usize = messages.iter().map(|m| m.matches(" or ").count()).sum();
                (count as f32 * 0.5).min(1.0)
            };
            vec![
                ("comparison_terms", comparisons),
                ("alternatives_mentioned", alternatives),
                ("question_rate", question_rate(window)),
            ]
        }
        ConversationPattern::ClarificationCascade => {
            let phrases = regex_hit_score(&CLARIFICATION_PATTERNS, messages, 0.5);
            let counter = (session.clarification_requests as f32 / 3.0).min(1.0);
            let brevity = {
                let avg: f32 = messages.iter().map(|m| word_count(m) as f32).sum::<f32>()
                    / messages.len().max(1) as f32;
                if avg < 8.0 { 1.0 } else { (16.0 / avg).min(1.0) - 0.5 }
            };
            vec![
                ("clarification_phrases", phrases),
                ("clarification_counter", counter),
                ("short_messages", brevity.max(0.0)),
            ]
        }
        ConversationPattern::TaskFocused => {
            let actions = regex_hit_score(&ACTION_PATTERNS, messages, 0.5);
            let specificity = {
                let specific = messages
                    .iter()
                    .filter(|m| m.chars().any(|c| c.is_ascii_digit()) || topic_keywords(m).len() >= 2)
                    .count();
                specific as f32 / messages.len().max(1) as f32
            };
            vec![
                ("action_verbs", actions),
                ("specificity", specificity),
                ("statement_rate", 1.0 - question_rate(window)),
            ]
        }
        ConversationPattern::SocialExploration => {
            let social = regex_hit_score(&SOCIAL_PATTERNS, messages, 0.5);
            let casual = {
                let lowered = messages.join(" ").to_lowercase();
                let hits = ["cool", "awesome", "fun", "hey", "thanks"]
                    .iter()
                    .filter(|w| lowered.contains(*w))
                    .count();
                (hits as f32 * 0.4).min(1.0)
            };
            vec![("social_terms", social), ("casual_tone", casual)]
        }
        ConversationPattern::ReturnVisitor => {
            let returning = regex_hit_score(&RETURNING_PATTERNS, messages, 0.5);
            let resolutions = (session.successful_resolutions as f32 / 2.0).min(1.0);
            vec![
                ("returning_phrases", returning),
                ("prior_resolutions", resolutions),
            ]
        }
        ConversationPattern::RapidFire => {
            let cadence = (session.turns_per_minute(now) / 3.0).min(1.0);
            let brevity = {
                let avg: f32 = messages.iter().map(|m| word_count(m) as f32).sum::<f32>()
                    / messages.len().max(1) as f32;
                if avg < 6.0 { 1.0 } else { (6.0 / avg).min(1.0) }
            };
            vec![
                ("turn_cadence", cadence),
                ("short_messages", brevity),
                ("question_rate", question_rate(window)),
            ]
        }
    }
}

/// Recognize patterns for one turn. Pure with respect to its inputs.
pub fn recognize_patterns(
    session: &Session,
    message: &str,
    now: DateTime<Utc>,
    seen_before: &[ConversationPattern],
    learning_weight: impl Fn(ConversationPattern) -> f32,
) -> Vec<PatternMatch> {
    let window = build_window(session, message, now);
    let consistency = window_consistency(&window);
    let trend = complexity_trend(&window);
    let mut matches = Vec::new();

    for profile in &VARIANTS {
        // The current message counts toward the minimum: the third message
        // of a thread must already be able to match a three-turn variant.
        if (window.messages.len() as u32) < profile.min_turns {
            continue;
        }
        let scores = indicators(profile, session, &window, now);
        if scores.is_empty() {
            continue;
        }
        let avg: f32 = scores.iter().map(|(_, s)| s).sum::<f32>() / scores.len() as f32;

        let consistency_fits = if profile.expects_high_consistency {
            consistency >= profile.consistency_threshold
        } else {
            consistency <= profile.consistency_threshold
        };
        let consistency_adjust = if consistency_fits { 0.1 } else { -0.1 };

        let historical_bonus = if seen_before.contains(&profile.pattern) {
            0.05 * learning_weight(profile.pattern)
        } else {
            0.0
        };

        let confidence =
            (avg * 0.7 + 0.1 + consistency_adjust + historical_bonus).clamp(0.0, 1.0);
        if confidence < 0.3 {
            continue;
        }

        matches.push(PatternMatch {
            pattern: profile.pattern,
            confidence,
            evidence: scores
                .iter()
                .map(|(name, score)| format!("{name}={score:.2}"))
                .collect(),
            turns_observed: window.turn_numbers.clone(),
            duration_minutes: window.duration_minutes,
            topic_consistency: consistency,
            complexity_trend: trend,
        });
    }

    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(3);
    matches
}

/// Recognizer with bounded per-user history and outcome learning.
pub struct PatternRecognizer {
    history: RwLock<HashMap<String, VecDeque<PatternMatch>>>,
    learning: RwLock<PatternLearning>,
    config: EngineConfig,
}

impl PatternRecognizer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            learning: RwLock::new(PatternLearning::new(
                LearningScope::Global,
                config.learning_rate,
            )),
            config,
        }
    }

    pub fn with_learning_scope(config: EngineConfig, scope: LearningScope) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            learning: RwLock::new(PatternLearning::new(scope, config.learning_rate)),
            config,
        }
    }

    /// Analyze one turn and append surviving matches to the user's history.
    pub async fn analyze(
        &self,
        user_id: &str,
        session: &Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> Vec<PatternMatch> {
        let seen: Vec<ConversationPattern> = {
            let history = self.history.read().await;
            history
                .get(user_id)
                .map(|h| h.iter().map(|m| m.pattern).collect())
                .unwrap_or_default()
        };
        let learning = self.learning.read().await.clone();
        let matches = recognize_patterns(session, message, now, &seen, |p| {
            learning.weight(user_id, p)
        });
        debug!(user_id, count = matches.len(), "patterns recognized");

        if !matches.is_empty() {
            let mut history = self.history.write().await;
            let log = history.entry(user_id.to_string()).or_default();
            for m in &matches {
                log.push_back(m.clone());
                while log.len() > self.config.pattern_history_cap {
                    log.pop_front();
                }
            }
        }
        matches
    }

    /// Feed a success/failure outcome back into the learning weight.
    pub async fn record_outcome(
        &self,
        user_id: &str,
        pattern: ConversationPattern,
        success: bool,
    ) {
        self.learning
            .write()
            .await
            .record_outcome(user_id, pattern, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::TurnRecord;
    use std::collections::HashMap as StdHashMap;

    fn session_with_turns(messages: &[&str]) -> Session {
        let mut session = Session::new("u1");
        for m in messages {
            session.record_turn(TurnRecord::new(*m, "ok", StdHashMap::new()), 50);
        }
        session
    }

    fn recognize(session: &Session, message: &str) -> Vec<PatternMatch> {
        recognize_patterns(session, message, Utc::now(), &[], |_| 1.0)
    }

    #[test]
    fn test_min_turns_gate() {
        let session = session_with_turns(&["tell me about defi"]);
        let matches = recognize(&session, "more about defi please");
        assert!(!matches
            .iter()
            .any(|m| m.pattern == ConversationPattern::DeepDive));
    }

    #[test]
    fn test_deep_dive_on_growing_topic_thread() {
        let session = session_with_turns(&[
            "what is defi",
            "how does defi lending actually work",
            "tell me more about defi liquidation risk and collateral factors",
        ]);
        let matches = recognize(
            &session,
            "go deeper on defi interest rate models and how utilization curves shape borrowing",
        );
        let deep = matches
            .iter()
            .find(|m| m.pattern == ConversationPattern::DeepDive)
            .expect("deep dive should match");
        assert!(deep.confidence > 0.5);
        assert_eq!(deep.complexity_trend, ComplexityTrend::Increasing);
        assert!(deep.topic_consistency > 0.7);
    }

    #[test]
    fn test_deep_dive_matches_on_third_message() {
        // Two committed turns; the message under analysis is the third
        let session = session_with_turns(&["what is defi", "how does defi lending actually work"]);
        let matches = recognize(
            &session,
            "tell me more about defi liquidation risk and collateral",
        );
        let deep = matches
            .iter()
            .find(|m| m.pattern == ConversationPattern::DeepDive)
            .expect("third growing message should complete a deep dive");
        assert!(deep.confidence > 0.5);
        assert_eq!(deep.complexity_trend, ComplexityTrend::Increasing);
    }

    #[test]
    fn test_window_drops_turns_past_ten() {
        // One off-topic turn followed by nine on-topic ones; with the
        // current message the off-topic turn falls outside the window
        let mut messages = vec!["any nft art galleries around"];
        messages.extend(std::iter::repeat("how does defi lending work").take(9));
        let session = session_with_turns(&messages);
        let matches = recognize(&session, "more about defi collateral rules");
        let deep = matches
            .iter()
            .find(|m| m.pattern == ConversationPattern::DeepDive)
            .expect("deep dive should match");
        assert_eq!(deep.topic_consistency, 1.0);
    }

    #[test]
    fn test_no_match_below_threshold_and_sorted() {
        let session = session_with_turns(&[
            "what is defi",
            "compare aave or compound for yield",
            "which one is better for staking",
        ]);
        let matches = recognize(&session, "aave vs compound, what's the difference?");
        assert!(matches.len() <= 3);
        for m in &matches {
            assert!(m.confidence >= 0.3);
        }
        for pair in matches.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(matches
            .iter()
            .any(|m| m.pattern == ConversationPattern::ComparisonShopping));
    }

    #[test]
    fn test_clarification_cascade() {
        let mut session = session_with_turns(&["huh?", "what do you mean by that"]);
        session.clarification_requests = 3;
        let matches = recognize(&session, "I'm confused, can you explain");
        let m = matches
            .iter()
            .find(|m| m.pattern == ConversationPattern::ClarificationCascade)
            .expect("cascade should match");
        assert!(m.confidence > 0.4);
    }

    #[test]
    fn test_historical_bonus_applied() {
        let session = session_with_turns(&[
            "what is defi",
            "how does defi lending actually work",
            "tell me more about defi liquidation risk and collateral",
        ]);
        let message = "go deeper on defi rate models";
        let without = recognize_patterns(&session, message, Utc::now(), &[], |_| 1.0);
        let with = recognize_patterns(
            &session,
            message,
            Utc::now(),
            &[ConversationPattern::DeepDive],
            |_| 1.0,
        );
        let base = without
            .iter()
            .find(|m| m.pattern == ConversationPattern::DeepDive)
            .unwrap()
            .confidence;
        let boosted = with
            .iter()
            .find(|m| m.pattern == ConversationPattern::DeepDive)
            .unwrap()
            .confidence;
        assert!((boosted - base - 0.05).abs() < 1e-4);
    }

    #[test]
    fn test_learning_weight_adjustment() {
        let mut learning = PatternLearning::new(LearningScope::Global, 0.05);
        let before = learning.weight("u1", ConversationPattern::DeepDive);
        learning.record_outcome("u1", ConversationPattern::DeepDive, true);
        let after = learning.weight("u1", ConversationPattern::DeepDive);
        assert!((after / before - 1.05).abs() < 1e-5);

        learning.record_outcome("u1", ConversationPattern::DeepDive, false);
        let reverted = learning.weight("u1", ConversationPattern::DeepDive);
        assert!(reverted < after);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let config = EngineConfig {
            pattern_history_cap: 5,
            ..Default::default()
        };
        let recognizer = PatternRecognizer::new(config);
        let session = session_with_turns(&[
            "what is defi",
            "how does defi lending work",
            "tell me more about defi risk",
        ]);
        for _ in 0..20 {
            recognizer
                .analyze("u1", &session, "go deeper on defi models", Utc::now())
                .await;
        }
        let history = recognizer.history.read().await;
        assert!(history.get("u1").unwrap().len() <= 5);
    }
}
