//! Dialogue orchestrator
//!
//! Sequences the analyzers for one turn, merges their outputs into a
//! single `DialogueFlowResult`, persists the updated session and degrades
//! gracefully: every stage after session load is individually
//! fault-isolated and replaced with a neutral default on failure, while a
//! failure to obtain a session at all yields a minimal fallback result.
//! Turns for the same user are serialized; different users run
//! concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::patterns::{PatternMatch, PatternRecognizer};
use crate::persona::{Persona, PersonaModel};
use crate::session::{Session, SessionRepository, SessionStore};
use crate::slots::{ExtractionOutcome, SlotExtractor};
use crate::suggestions::{ProactiveSuggestion, SuggestionGenerator};
use crate::switching::{
    extract_context, ContextSwitchDetector, ContextSwitchResult, SwitchType, TransitionPlan,
};
use crate::value_objects::{
    ConfidenceLevel, ExternalResultContext, IntentHistoryEntry, LifecycleStage,
};

/// The complete decision bundle for one turn.
///
/// Every field is a primitive, enum tag, list or nested record so the
/// whole result serializes to a plain structured document for the
/// response layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueFlowResult {
    pub user_id: String,
    pub session_id: Uuid,
    pub turn_count: u32,
    /// Newly accepted slots this turn
    pub slots_filled: Vec<crate::value_objects::Slot>,
    /// Core slot filling progress in [0, 1]
    pub slot_progress: f32,
    pub slots_sufficient: bool,
    /// Highest-importance slot worth eliciting next
    pub next_slot: Option<String>,
    pub persona: Persona,
    pub patterns: Vec<PatternMatch>,
    pub context_switch: ContextSwitchResult,
    pub transition_plan: Option<TransitionPlan>,
    pub proactive_suggestions: Vec<ProactiveSuggestion>,
    /// Plain-text guidance for the response layer
    pub recommendations: Vec<String>,
    /// Merged analysis summary for prompt enrichment
    pub enhanced_context: serde_json::Value,
    pub dialogue_quality: f32,
    pub proactive_assistance_given: bool,
    pub context_continuity: f32,
    /// True when the turn was served by the fallback path
    pub fallback_mode: bool,
    /// False when the session could not be durably saved
    pub persisted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Orchestrates one analysis pipeline execution per inbound message.
///
/// Components are constructed once and injected here; there is no
/// module-level shared state.
pub struct DialogueEngine {
    store: SessionStore,
    extractor: SlotExtractor,
    personas: PersonaModel,
    patterns: PatternRecognizer,
    switching: ContextSwitchDetector,
    suggestions: SuggestionGenerator,
    config: EngineConfig,
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    #[cfg(test)]
    fail_stage: std::sync::Mutex<Option<&'static str>>,
}

impl DialogueEngine {
    pub fn new(repository: Arc<dyn SessionRepository>, config: EngineConfig) -> Self {
        Self {
            store: SessionStore::new(repository, config.clone()),
            extractor: SlotExtractor::new(config.clone()),
            personas: PersonaModel::new(config.clone()),
            patterns: PatternRecognizer::new(config.clone()),
            switching: ContextSwitchDetector::new(),
            suggestions: SuggestionGenerator::new(config.clone()),
            config,
            turn_locks: Mutex::new(HashMap::new()),
            #[cfg(test)]
            fail_stage: std::sync::Mutex::new(None),
        }
    }

    /// Access to the session store for hosts (stats, cleanup).
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Feed a pattern outcome back into the recognizer's learning weight.
    pub async fn record_pattern_outcome(
        &self,
        user_id: &str,
        pattern: crate::patterns::ConversationPattern,
        success: bool,
    ) {
        self.patterns.record_outcome(user_id, pattern, success).await;
    }

    /// Persist-then-evict sessions idle past the configured age.
    pub async fn cleanup_inactive(&self) -> usize {
        self.store
            .cleanup_inactive(self.config.session_max_age_hours)
            .await
    }

    /// Process one inbound message for a user.
    ///
    /// Always returns a well-formed result; degraded turns are marked via
    /// `fallback_mode` and neutral defaults rather than errors.
    pub async fn process_turn(
        &self,
        user_id: &str,
        message: &str,
        external: Option<ExternalResultContext>,
    ) -> DialogueFlowResult {
        // Single writer per user; different users proceed independently
        let user_lock = {
            let mut locks = self.turn_locks.lock().await;
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _turn_guard = user_lock.lock().await;

        let now = Utc::now();

        let session = match self.load_session(user_id).await {
            Ok(session) => session,
            Err(err) => {
                error!(user_id, error = %err, "session load failed, serving fallback");
                return self.fallback_result(user_id, message, now);
            }
        };

        // Analysis stages only read the session snapshot; each one is
        // individually fault-isolated.
        let extraction = self
            .run_extraction(message, &session, external.as_ref(), now)
            .unwrap_or_else(|err| {
                warn!(user_id, error = %err, "slot extraction degraded");
                ExtractionOutcome {
                    slots: Vec::new(),
                    progress: 0.0,
                    sufficient: false,
                    next_slot: None,
                }
            });

        let persona = match self.run_persona(user_id, message, &session, now).await {
            Ok(persona) => persona,
            Err(err) => {
                warn!(user_id, error = %err, "persona update degraded");
                Persona::neutral(user_id)
            }
        };

        let patterns = match self.run_patterns(user_id, &session, message, now).await {
            Ok(patterns) => patterns,
            Err(err) => {
                warn!(user_id, error = %err, "pattern detection degraded");
                Vec::new()
            }
        };

        let switch = self
            .run_switch(&session, message, now)
            .unwrap_or_else(|err| {
                warn!(user_id, error = %err, "switch detection degraded");
                ContextSwitchResult::no_switch(extract_context(message))
            });

        let suggestions = match self
            .run_suggestions(user_id, &session, &persona, &patterns, &switch, external.as_ref(), now)
            .await
        {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(user_id, error = %err, "suggestion generation degraded");
                Vec::new()
            }
        };

        let transition_plan = switch
            .switch_detected
            .then(|| self.switching.manage_smooth_transition(&switch));

        let recommendations = build_recommendations(&extraction, &switch, &suggestions);
        let enhanced_context = build_enhanced_context(&session, &extraction, &persona, &patterns, &switch);

        let (session, persisted) = self
            .commit_turn(session, message, &extraction, &switch, now)
            .await;

        let pattern_quality = patterns.first().map(|p| p.confidence).unwrap_or(0.0);
        let switch_handling = if switch.switch_detected {
            1.0 - switch.confidence
        } else {
            1.0
        };
        let suggestion_quality = suggestions.first().map(|s| s.confidence).unwrap_or(0.0);
        let dialogue_quality = (pattern_quality * 0.3
            + switch_handling * 0.2
            + suggestion_quality * 0.3
            + persona.persona_confidence * 0.2)
            .clamp(0.0, 1.0);

        let context_continuity = transition_plan
            .as_ref()
            .map(|p| p.estimated_success_rate)
            .unwrap_or(1.0);

        debug!(
            user_id,
            turn = session.turn_count,
            quality = dialogue_quality,
            "turn processed"
        );

        DialogueFlowResult {
            user_id: user_id.to_string(),
            session_id: session.session_id,
            turn_count: session.turn_count,
            slots_filled: extraction.slots,
            slot_progress: extraction.progress,
            slots_sufficient: extraction.sufficient,
            next_slot: extraction.next_slot,
            proactive_assistance_given: !suggestions.is_empty(),
            persona,
            patterns,
            context_switch: switch,
            transition_plan,
            proactive_suggestions: suggestions,
            recommendations,
            enhanced_context,
            dialogue_quality,
            context_continuity,
            fallback_mode: false,
            persisted,
            timestamp: now,
        }
    }

    /// Commit the turn's single mutation of the session, then persist.
    async fn commit_turn(
        &self,
        mut session: Session,
        message: &str,
        extraction: &ExtractionOutcome,
        switch: &ContextSwitchResult,
        now: DateTime<Utc>,
    ) -> (Session, bool) {
        for slot in &extraction.slots {
            session.set_slot(slot.clone());
        }

        if switch.switch_type == Some(SwitchType::Clarification) {
            session.clarification_requests += 1;
            session.lifecycle = LifecycleStage::Clarification;
        } else if extraction.sufficient {
            session.successful_resolutions += 1;
            session.lifecycle = LifecycleStage::EventSearch;
        } else if session.lifecycle == LifecycleStage::Clarification {
            session.lifecycle = LifecycleStage::FollowUp;
        }

        session.record_intent(IntentHistoryEntry {
            intent: switch.new_context.intent.clone(),
            confidence_level: ConfidenceLevel::from_score(switch.new_context.specificity),
            timestamp: now,
            context: switch
                .new_context
                .primary_topic()
                .unwrap_or_default()
                .to_string(),
            resolved: extraction.sufficient,
        });

        session.push_context(
            json!({
                "topic": switch.new_context.primary_topic(),
                "intent": switch.new_context.intent,
                "switch_detected": switch.switch_detected,
            }),
            self.config.context_stack_cap,
        );

        let response = switch.acknowledgment.clone().unwrap_or_default();
        let mut metadata = HashMap::new();
        metadata.insert("switch_detected".to_string(), json!(switch.switch_detected));
        metadata.insert("slot_progress".to_string(), json!(extraction.progress));
        session.record_turn(
            crate::value_objects::TurnRecord::new(message, response, metadata),
            self.config.turn_memory_cap,
        );

        self.store.put(session.clone()).await;
        let persisted = match self.store.persist(&session.user_id).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(user_id = %session.user_id, error = %err, "session not durably saved");
                false
            }
        };
        (session, persisted)
    }

    /// Minimal well-formed result when no session could be obtained.
    ///
    /// Nothing beyond the fallback marker is derived from state.
    fn fallback_result(
        &self,
        user_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> DialogueFlowResult {
        DialogueFlowResult {
            user_id: user_id.to_string(),
            session_id: Uuid::new_v4(),
            turn_count: 0,
            slots_filled: Vec::new(),
            slot_progress: 0.0,
            slots_sufficient: false,
            next_slot: None,
            persona: Persona::neutral(user_id),
            patterns: Vec::new(),
            context_switch: ContextSwitchResult::no_switch(extract_context(message)),
            transition_plan: None,
            proactive_suggestions: Vec::new(),
            recommendations: vec![
                "Continue the conversation and ask the user what they need.".to_string(),
            ],
            enhanced_context: json!({}),
            dialogue_quality: 0.0,
            proactive_assistance_given: false,
            context_continuity: 1.0,
            fallback_mode: true,
            persisted: false,
            timestamp: now,
        }
    }

    async fn load_session(&self, user_id: &str) -> EngineResult<Session> {
        self.check_stage("load")?;
        Ok(self.store.get_or_create(user_id).await)
    }

    fn run_extraction(
        &self,
        message: &str,
        session: &Session,
        external: Option<&ExternalResultContext>,
        now: DateTime<Utc>,
    ) -> EngineResult<ExtractionOutcome> {
        self.check_stage("extract_slots")?;
        Ok(self.extractor.extract(message, session, external, now))
    }

    async fn run_persona(
        &self,
        user_id: &str,
        message: &str,
        session: &Session,
        now: DateTime<Utc>,
    ) -> EngineResult<Persona> {
        self.check_stage("persona")?;
        Ok(self.personas.observe(user_id, message, session, now).await)
    }

    async fn run_patterns(
        &self,
        user_id: &str,
        session: &Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<PatternMatch>> {
        self.check_stage("patterns")?;
        Ok(self.patterns.analyze(user_id, session, message, now).await)
    }

    fn run_switch(
        &self,
        session: &Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ContextSwitchResult> {
        self.check_stage("switch")?;
        Ok(self.switching.detect(session, message, now))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_suggestions(
        &self,
        user_id: &str,
        session: &Session,
        persona: &Persona,
        patterns: &[PatternMatch],
        switch: &ContextSwitchResult,
        external: Option<&ExternalResultContext>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<ProactiveSuggestion>> {
        self.check_stage("suggestions")?;
        Ok(self
            .suggestions
            .generate(user_id, session, persona, patterns, switch, external, now)
            .await)
    }

    #[cfg(test)]
    fn check_stage(&self, stage: &'static str) -> EngineResult<()> {
        use crate::error::EngineError;
        if *self.fail_stage.lock().unwrap() == Some(stage) {
            if stage == "load" {
                return Err(EngineError::Pipeline("induced load failure".to_string()));
            }
            return Err(EngineError::StageFailure {
                stage,
                reason: "induced failure".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_stage(&self, _stage: &'static str) -> EngineResult<()> {
        Ok(())
    }
}

fn build_recommendations(
    extraction: &ExtractionOutcome,
    switch: &ContextSwitchResult,
    suggestions: &[ProactiveSuggestion],
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if let Some(ack) = &switch.acknowledgment {
        recommendations.push(format!("Acknowledge the topic change: {ack}"));
    }
    if let Some(next) = &extraction.next_slot {
        recommendations.push(format!("Ask the user about their {next}."));
    }
    if let Some(top) = suggestions.first() {
        recommendations.push(format!("Offer: {}", top.content));
    }
    if recommendations.is_empty() {
        recommendations.push("Answer directly and keep the current topic going.".to_string());
    }
    recommendations
}

fn build_enhanced_context(
    session: &Session,
    extraction: &ExtractionOutcome,
    persona: &Persona,
    patterns: &[PatternMatch],
    switch: &ContextSwitchResult,
) -> serde_json::Value {
    json!({
        "active_slots": session.slots.keys().collect::<Vec<_>>(),
        "new_slots": extraction.slots.iter().map(|s| &s.name).collect::<Vec<_>>(),
        "slot_progress": extraction.progress,
        "primary_persona": persona.primary_persona,
        "experience_level": persona.experience_level,
        "dominant_pattern": patterns.first().map(|p| p.pattern),
        "current_topic": switch.new_context.primary_topic(),
        "topic_relationship": switch.topic_relationship,
        "preserved_elements": switch.preserved_elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionRepository;

    fn engine() -> DialogueEngine {
        DialogueEngine::new(
            Arc::new(InMemorySessionRepository::new()),
            EngineConfig::default(),
        )
    }

    async fn seed_defi_turns(engine: &DialogueEngine, user: &str) {
        engine.process_turn(user, "tell me about defi", None).await;
        engine
            .process_turn(user, "how does defi lending actually work", None)
            .await;
        engine
            .process_turn(user, "tell me more about defi liquidation risk and collateral", None)
            .await;
    }

    #[tokio::test]
    async fn test_basic_turn_is_well_formed() {
        let engine = engine();
        let result = engine
            .process_turn("u1", "looking for defi workshops in Berlin this weekend", None)
            .await;

        assert!(!result.fallback_mode);
        assert!(result.persisted);
        assert_eq!(result.turn_count, 1);
        assert!(result.slots_sufficient);
        assert!(result.dialogue_quality >= 0.0 && result.dialogue_quality <= 1.0);
        // Whole result serializes to a plain document
        let doc = serde_json::to_value(&result).unwrap();
        assert!(doc.get("context_switch").is_some());
    }

    #[tokio::test]
    async fn test_isolated_stage_failure_keeps_rest() {
        let engine = engine();
        seed_defi_turns(&engine, "u1").await;

        *engine.fail_stage.lock().unwrap() = Some("suggestions");
        let result = engine
            .process_turn("u1", "go deeper on defi rate models", None)
            .await;

        assert!(result.proactive_suggestions.is_empty());
        assert!(!result.proactive_assistance_given);
        // Not a full fallback: everything else is populated
        assert!(!result.fallback_mode);
        assert!(!result.patterns.is_empty());
        assert_eq!(result.turn_count, 4);
    }

    #[tokio::test]
    async fn test_load_failure_serves_fallback() {
        let engine = engine();
        *engine.fail_stage.lock().unwrap() = Some("load");
        let result = engine.process_turn("u1", "hello there", None).await;

        assert!(result.fallback_mode);
        assert!(!result.persisted);
        assert!(result.patterns.is_empty());
        assert!(result.proactive_suggestions.is_empty());
        assert_eq!(result.recommendations.len(), 1);

        // A fallback turn commits nothing
        *engine.fail_stage.lock().unwrap() = None;
        let next = engine.process_turn("u1", "hello again", None).await;
        assert_eq!(next.turn_count, 1);
    }

    #[tokio::test]
    async fn test_switch_scenario_end_to_end() {
        let engine = engine();
        seed_defi_turns(&engine, "u1").await;

        let result = engine
            .process_turn("u1", "Let's talk about NFTs instead", None)
            .await;
        let switch = &result.context_switch;
        assert!(switch.switch_detected);
        assert_eq!(switch.switch_type, Some(SwitchType::TopicChange));
        assert!(result.transition_plan.is_some());
        assert!(result.context_continuity > 0.0);
        // Switch handling lowers quality relative to its confidence
        assert!(result.dialogue_quality <= 1.0);
    }

    #[tokio::test]
    async fn test_clarification_switch_updates_counters() {
        let engine = engine();
        engine.process_turn("u1", "tell me about defi", None).await;
        engine
            .process_turn("u1", "what do you mean by that? i'm confused", None)
            .await;

        let session = engine.store().get_or_create("u1").await;
        assert!(session.clarification_requests >= 1);
        assert_eq!(session.lifecycle, LifecycleStage::Clarification);
    }

    #[tokio::test]
    async fn test_concurrent_users_do_not_interfere() {
        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for user in ["a", "b", "c"] {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    engine
                        .process_turn(user, "looking for nft meetups in Berlin", None)
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for user in ["a", "b", "c"] {
            let session = engine.store().get_or_create(user).await;
            assert_eq!(session.turn_count, 5);
        }
    }
}
