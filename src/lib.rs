//! Dialogue intelligence module
//!
//! This module turns raw conversation turns into structured dialogue
//! decisions for an assistant. It provides:
//! - Per-user session tracking with bounded memory and persistence
//! - Slot extraction with tiered confidence and validation
//! - Behavioral persona modeling from time-decayed signals
//! - Conversation pattern recognition with outcome-based learning
//! - Context switch detection and smooth transition planning
//! - Gated, ranked proactive suggestions
//!
//! The `DialogueEngine` orchestrates all analyzers per turn and merges
//! their outputs into a single serializable `DialogueFlowResult`,
//! degrading to neutral defaults when an individual stage fails.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod patterns;
pub mod persona;
pub mod session;
pub mod slots;
pub mod suggestions;
pub mod switching;
pub mod value_objects;

// Re-export main types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};

pub use orchestrator::{DialogueEngine, DialogueFlowResult};

pub use session::{
    InMemorySessionRepository, Session, SessionRepository, SessionStats, SessionStore,
};

pub use slots::{ExtractionOutcome, SlotExtractor};

pub use persona::{
    EngagementStyle, ExperienceLevel, Persona, PersonaModel, PersonaSignal, PersonaType,
    SignalType,
};

pub use patterns::{
    ComplexityTrend, ConversationPattern, LearningScope, PatternLearning, PatternMatch,
    PatternRecognizer,
};

pub use switching::{
    ContextSwitchDetector, ContextSwitchResult, MessageContext, QuestionType, SwitchType,
    TopicRelationship, TransitionPlan,
};

pub use suggestions::{
    Momentum, ProactiveSuggestion, SuggestionGenerator, SuggestionPriority, SuggestionType,
};

pub use value_objects::{
    ConfidenceLevel, ContextFrame, ExternalResultContext, IntentHistoryEntry, LifecycleStage,
    Slot, SlotSource, SlotType, TurnRecord,
};
