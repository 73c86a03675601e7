//! Proactive suggestion generation
//!
//! Synthesizes next-step suggestions from four independent sources
//! (detected pattern, persona preferences, session context, external
//! results), gates whether anything should surface at all this turn,
//! then dedupes by type and ranks by a weighted overall score. Only the
//! top three survive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EngineConfig;
use crate::patterns::{ConversationPattern, PatternMatch};
use crate::persona::{Persona, PersonaType};
use crate::session::Session;
use crate::switching::ContextSwitchResult;
use crate::value_objects::ExternalResultContext;

/// Kinds of suggestions the engine can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    RelatedTopic,
    NextStep,
    Refinement,
    Alternative,
    DeepDive,
    Broaden,
    Clarification,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

impl SuggestionPriority {
    fn ranking_bonus(self) -> f32 {
        match self {
            SuggestionPriority::High => 0.1,
            SuggestionPriority::Medium => 0.05,
            SuggestionPriority::Low => 0.0,
        }
    }
}

/// Conversation momentum bucket derived from turn cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    High,
    Medium,
    Low,
}

/// An unsolicited next-step recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveSuggestion {
    pub suggestion_type: SuggestionType,
    pub priority: SuggestionPriority,
    /// User-facing suggestion text
    pub content: String,
    /// Why the engine thinks this helps
    pub reasoning: String,
    pub confidence: f32,
    /// Signals that produced the candidate
    pub triggers: Vec<String>,
    pub persona_alignment: f32,
    pub context_relevance: f32,
    pub timing_score: f32,
    /// Concrete action the response layer can take
    pub suggested_action: String,
    pub estimated_value: f32,
}

/// Preferred suggestion types per persona, strongest first.
fn preferred_types(persona: PersonaType) -> [SuggestionType; 3] {
    match persona {
        PersonaType::TechnicalExpert => [
            SuggestionType::DeepDive,
            SuggestionType::Refinement,
            SuggestionType::NextStep,
        ],
        PersonaType::Investor => [
            SuggestionType::Alternative,
            SuggestionType::Refinement,
            SuggestionType::Action,
        ],
        PersonaType::Student => [
            SuggestionType::Clarification,
            SuggestionType::RelatedTopic,
            SuggestionType::DeepDive,
        ],
        PersonaType::Researcher => [
            SuggestionType::DeepDive,
            SuggestionType::RelatedTopic,
            SuggestionType::Broaden,
        ],
        PersonaType::BusinessProfessional => [
            SuggestionType::Action,
            SuggestionType::NextStep,
            SuggestionType::Refinement,
        ],
        PersonaType::Networker => [
            SuggestionType::RelatedTopic,
            SuggestionType::Action,
            SuggestionType::Broaden,
        ],
        PersonaType::CasualExplorer => [
            SuggestionType::Broaden,
            SuggestionType::RelatedTopic,
            SuggestionType::Alternative,
        ],
        PersonaType::EventOrganizer => [
            SuggestionType::Action,
            SuggestionType::NextStep,
            SuggestionType::Alternative,
        ],
    }
}

fn pattern_suggestion_type(pattern: ConversationPattern) -> SuggestionType {
    match pattern {
        ConversationPattern::DeepDive => SuggestionType::DeepDive,
        ConversationPattern::BroadExploration => SuggestionType::RelatedTopic,
        ConversationPattern::ComparisonShopping => SuggestionType::Alternative,
        ConversationPattern::ClarificationCascade => SuggestionType::Clarification,
        ConversationPattern::TaskFocused => SuggestionType::Action,
        ConversationPattern::SocialExploration => SuggestionType::RelatedTopic,
        ConversationPattern::ReturnVisitor => SuggestionType::NextStep,
        ConversationPattern::RapidFire => SuggestionType::Refinement,
    }
}

/// Momentum from turn cadence.
pub fn momentum(session: &Session, now: DateTime<Utc>) -> Momentum {
    let tpm = session.turns_per_minute(now);
    if tpm > 2.0 {
        Momentum::High
    } else if tpm > 0.5 {
        Momentum::Medium
    } else {
        Momentum::Low
    }
}

/// Engagement from average message length in the turn window.
pub fn engagement(session: &Session) -> Momentum {
    let turns = session.recent_turns(10);
    if turns.is_empty() {
        return Momentum::Low;
    }
    let avg: f32 = turns
        .iter()
        .map(|t| t.user_message.split_whitespace().count() as f32)
        .sum::<f32>()
        / turns.len() as f32;
    if avg >= 15.0 {
        Momentum::High
    } else if avg >= 6.0 {
        Momentum::Medium
    } else {
        Momentum::Low
    }
}

/// Whether anything should be surfaced at all this turn.
#[allow(clippy::too_many_arguments)]
pub fn should_suggest(
    session: &Session,
    persona: &Persona,
    patterns: &[PatternMatch],
    last_issued: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown_secs: i64,
    turn_interval: u32,
) -> bool {
    if let Some(last) = last_issued {
        if now.signed_duration_since(last) < chrono::Duration::seconds(cooldown_secs) {
            return false;
        }
    }
    // Repeated clarification always wins, whatever the momentum
    if session.clarification_requests > 2 {
        return true;
    }
    let momentum = momentum(session, now);
    if momentum == Momentum::High && engagement(session) == Momentum::High {
        return false;
    }
    if patterns.iter().any(|p| p.confidence > 0.7) {
        return true;
    }
    if persona.primary_persona.is_learning_oriented() {
        return true;
    }
    if momentum == Momentum::Low {
        return true;
    }
    session.turn_count > 0 && session.turn_count % turn_interval == 0
}

fn alignment_for(persona: &Persona, suggestion_type: SuggestionType) -> f32 {
    let preferred = preferred_types(persona.primary_persona);
    match preferred.iter().position(|t| *t == suggestion_type) {
        Some(0) => 0.9,
        Some(_) => 0.75,
        None => 0.5,
    }
}

/// Generate candidates from the four independent sources.
pub fn generate_candidates(
    session: &Session,
    persona: &Persona,
    patterns: &[PatternMatch],
    switch: &ContextSwitchResult,
    external: Option<&ExternalResultContext>,
) -> Vec<ProactiveSuggestion> {
    let mut candidates = Vec::new();
    let topic = switch
        .new_context
        .primary_topic()
        .unwrap_or("this topic")
        .to_string();

    // Source 1: strongest detected pattern
    if let Some(strongest) = patterns.first() {
        let suggestion_type = pattern_suggestion_type(strongest.pattern);
        candidates.push(ProactiveSuggestion {
            suggestion_type,
            priority: if strongest.confidence > 0.7 {
                SuggestionPriority::High
            } else {
                SuggestionPriority::Medium
            },
            content: match suggestion_type {
                SuggestionType::DeepDive => format!("Want to go deeper into {topic}?"),
                SuggestionType::Alternative => {
                    format!("I can lay out the alternatives around {topic} side by side.")
                }
                SuggestionType::Clarification => {
                    format!("Should I restate what we know about {topic} so far?")
                }
                SuggestionType::Action => {
                    format!("Ready to take the next step on {topic}?")
                }
                _ => format!("There are related angles on {topic} worth a look."),
            },
            reasoning: format!("{:?} pattern detected", strongest.pattern),
            confidence: strongest.confidence,
            triggers: vec![format!("pattern:{:?}", strongest.pattern)],
            persona_alignment: alignment_for(persona, suggestion_type),
            context_relevance: 0.8,
            timing_score: 0.7,
            suggested_action: format!("offer_{suggestion_type:?}").to_lowercase(),
            estimated_value: strongest.confidence,
        });
    }

    // Source 2: persona preference table
    if persona.persona_confidence > 0.0 {
        let suggestion_type = preferred_types(persona.primary_persona)[0];
        candidates.push(ProactiveSuggestion {
            suggestion_type,
            priority: SuggestionPriority::Medium,
            content: format!("Based on how you explore, {topic} has more to offer."),
            reasoning: format!("{:?} persona preference", persona.primary_persona),
            confidence: 0.5 + 0.3 * persona.persona_confidence,
            triggers: vec![format!("persona:{:?}", persona.primary_persona)],
            persona_alignment: 0.9,
            context_relevance: 0.6,
            timing_score: 0.6,
            suggested_action: format!("offer_{suggestion_type:?}").to_lowercase(),
            estimated_value: persona.persona_confidence,
        });
    }

    // Source 3: session context
    if session.clarification_requests > 2 {
        candidates.push(ProactiveSuggestion {
            suggestion_type: SuggestionType::Clarification,
            priority: SuggestionPriority::High,
            content: "It seems I haven't been clear. Let me summarize where we are.".to_string(),
            reasoning: "repeated clarification requests".to_string(),
            confidence: 0.85,
            triggers: vec!["session:clarification_requests".to_string()],
            persona_alignment: alignment_for(persona, SuggestionType::Clarification),
            context_relevance: 0.9,
            timing_score: 0.8,
            suggested_action: "summarize_context".to_string(),
            estimated_value: 0.8,
        });
    }
    if session.successful_resolutions >= 3 {
        candidates.push(ProactiveSuggestion {
            suggestion_type: SuggestionType::NextStep,
            priority: SuggestionPriority::Medium,
            content: "You've covered a lot of ground. Want to line up next steps?".to_string(),
            reasoning: "multiple resolved requests this session".to_string(),
            confidence: 0.7,
            triggers: vec!["session:successful_resolutions".to_string()],
            persona_alignment: alignment_for(persona, SuggestionType::NextStep),
            context_relevance: 0.7,
            timing_score: 0.7,
            suggested_action: "propose_next_steps".to_string(),
            estimated_value: 0.6,
        });
    }
    if persona.interests.len() >= 3 {
        candidates.push(ProactiveSuggestion {
            suggestion_type: SuggestionType::Broaden,
            priority: SuggestionPriority::Medium,
            content: "Your interests span several areas. I can connect them.".to_string(),
            reasoning: "multi-interest exploration".to_string(),
            confidence: 0.6,
            triggers: vec!["persona:interests".to_string()],
            persona_alignment: alignment_for(persona, SuggestionType::Broaden),
            context_relevance: 0.6,
            timing_score: 0.6,
            suggested_action: "cross_link_interests".to_string(),
            estimated_value: 0.5,
        });
    }

    // Source 4: external result shape
    if let Some(external) = external {
        if external.result_count.unwrap_or(0) > 20 {
            candidates.push(ProactiveSuggestion {
                suggestion_type: SuggestionType::Refinement,
                priority: SuggestionPriority::High,
                content: "That's a lot of results. Want to narrow them down?".to_string(),
                reasoning: "large external result count".to_string(),
                confidence: 0.8,
                triggers: vec!["external:result_count".to_string()],
                persona_alignment: alignment_for(persona, SuggestionType::Refinement),
                context_relevance: 0.9,
                timing_score: 0.8,
                suggested_action: "offer_filters".to_string(),
                estimated_value: 0.7,
            });
        }
        if external.similar_results.unwrap_or(0) > 5 {
            candidates.push(ProactiveSuggestion {
                suggestion_type: SuggestionType::Alternative,
                priority: SuggestionPriority::Medium,
                content: "Many of these look alike. I can surface distinct options.".to_string(),
                reasoning: "many near-duplicate results".to_string(),
                confidence: 0.65,
                triggers: vec!["external:similar_results".to_string()],
                persona_alignment: alignment_for(persona, SuggestionType::Alternative),
                context_relevance: 0.7,
                timing_score: 0.7,
                suggested_action: "dedupe_results".to_string(),
                estimated_value: 0.6,
            });
        }
        if external.result_diversity.unwrap_or(0.0) > 0.7 {
            candidates.push(ProactiveSuggestion {
                suggestion_type: SuggestionType::Broaden,
                priority: SuggestionPriority::Medium,
                content: "The results cover quite different directions. Want a map of them?"
                    .to_string(),
                reasoning: "high external result diversity".to_string(),
                confidence: 0.6,
                triggers: vec!["external:result_diversity".to_string()],
                persona_alignment: alignment_for(persona, SuggestionType::Broaden),
                context_relevance: 0.7,
                timing_score: 0.6,
                suggested_action: "cluster_results".to_string(),
                estimated_value: 0.55,
            });
        }
    }

    candidates
}

/// Dedupe by type (highest confidence wins), score, cut at 0.5, top 3.
pub fn rank_suggestions(candidates: Vec<ProactiveSuggestion>) -> Vec<ProactiveSuggestion> {
    let mut best: HashMap<SuggestionType, ProactiveSuggestion> = HashMap::new();
    for candidate in candidates {
        match best.get(&candidate.suggestion_type) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best.insert(candidate.suggestion_type, candidate);
            }
        }
    }

    let overall = |s: &ProactiveSuggestion| -> f32 {
        s.confidence * 0.3
            + s.persona_alignment * 0.3
            + s.context_relevance * 0.2
            + s.timing_score * 0.2
            + s.priority.ranking_bonus()
    };

    let mut ranked: Vec<ProactiveSuggestion> = best
        .into_values()
        .filter(|s| overall(s) > 0.5)
        .collect();
    ranked.sort_by(|a, b| {
        overall(b)
            .partial_cmp(&overall(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(3);
    ranked
}

/// Generator with per-user issuance tracking and bounded history.
pub struct SuggestionGenerator {
    last_issued: RwLock<HashMap<String, DateTime<Utc>>>,
    history: RwLock<HashMap<String, VecDeque<ProactiveSuggestion>>>,
    config: EngineConfig,
}

impl SuggestionGenerator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            last_issued: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Gate, generate, rank and record suggestions for one turn.
    pub async fn generate(
        &self,
        user_id: &str,
        session: &Session,
        persona: &Persona,
        patterns: &[PatternMatch],
        switch: &ContextSwitchResult,
        external: Option<&ExternalResultContext>,
        now: DateTime<Utc>,
    ) -> Vec<ProactiveSuggestion> {
        let last = self.last_issued.read().await.get(user_id).copied();
        if !should_suggest(
            session,
            persona,
            patterns,
            last,
            now,
            self.config.suggestion_cooldown_secs,
            self.config.suggestion_turn_interval,
        ) {
            debug!(user_id, "suggestion gate closed this turn");
            return Vec::new();
        }

        let ranked = rank_suggestions(generate_candidates(
            session, persona, patterns, switch, external,
        ));

        if !ranked.is_empty() {
            self.last_issued
                .write()
                .await
                .insert(user_id.to_string(), now);
            let mut history = self.history.write().await;
            let log = history.entry(user_id.to_string()).or_default();
            for s in &ranked {
                log.push_back(s.clone());
                while log.len() > self.config.suggestion_history_cap {
                    log.pop_front();
                }
            }
        }
        ranked
    }
}
