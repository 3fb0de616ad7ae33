//! The decision engine: envelope parsing, question detection, state
//! classification, advisory suggestions, automatic routing, stop
//! conditions, and the conversation flow graph.
//!
//! Every function here is synchronous and pure with respect to its explicit
//! inputs, except [`flow::ConversationFlow`] which is caller-owned mutable
//! state. Callers must serialize submissions for the same session; distinct
//! sessions are fully independent.

pub mod autopilot;
pub mod envelope;
pub mod flow;
pub mod questions;
pub mod state;
pub mod stop;
pub mod suggest;

use crate::config::OrchestratorConfig;

/// Bundle of the engine components, built once and shared.
pub struct Orchestrator {
    pub parser: envelope::EnvelopeParser,
    pub detector: questions::QuestionDetector,
    pub classifier: state::StateClassifier,
    pub sommelier: suggest::SuggestionEngine,
    pub pilote: autopilot::AutoPilot,
}

impl Orchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            parser: envelope::EnvelopeParser::new(),
            detector: questions::QuestionDetector::new(),
            classifier: state::StateClassifier::new(),
            sommelier: suggest::SuggestionEngine::new(config),
            pilote: autopilot::AutoPilot::new(config),
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(&OrchestratorConfig::default())
    }
}
