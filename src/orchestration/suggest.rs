//! Sommelier mode — advisory suggestions for the human operator.
//!
//! Priority-ordered rule evaluation, first match wins. Requires a parsed
//! envelope on the latest message; unformatted messages cannot be advised
//! on and yield `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::orchestration::questions::QuestionDetector;
use crate::session::model::{CafeType, EpistemicState, Message, Session};

/// How many trailing messages define "recent speakers" for routing.
const RECENT_SPEAKER_WINDOW: usize = 3;

/// What the suggestion asks the operator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Breakthrough alert, no routing.
    Alert,
    /// Serve a different café type.
    Cafe,
    /// Route the conversation to a specific participant.
    Routing,
}

/// An advisory suggestion, validated (or not) by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: String,
    pub suggested_cafe: Option<CafeType>,
    pub suggested_target: Option<String>,
    pub reason: String,
    /// 0.0 to 1.0.
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    fn new(kind: SuggestionKind, message: String, reason: &str, confidence: f32) -> Self {
        Self {
            kind,
            message,
            suggested_cafe: None,
            suggested_target: None,
            reason: reason.to_string(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// The advisory engine.
pub struct SuggestionEngine {
    detector: QuestionDetector,
    research_specialist: String,
}

impl SuggestionEngine {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            detector: QuestionDetector::new(),
            research_specialist: config.research_specialist.clone(),
        }
    }

    /// Propose at most one action for the latest message.
    pub fn suggest(&self, session: &Session, latest: &Message) -> Option<Suggestion> {
        // Unformatted messages carry no state to advise on.
        let envelope = latest.envelope.as_ref()?;
        let sender = &latest.sender;

        match envelope.state {
            EpistemicState::Oracle => {
                debug!(sender = %sender, "oracle moment, raising alert");
                return Some(Suggestion::new(
                    SuggestionKind::Alert,
                    format!("Moment oracle détecté chez {sender} !"),
                    "État oracle = percée majeure",
                    1.0,
                ));
            }
            EpistemicState::Intuition => {
                let mut suggestion = Suggestion::new(
                    SuggestionKind::Cafe,
                    format!("{sender} a une intuition. Servir un café cosmique ?"),
                    "État intuition détecté",
                    0.8,
                );
                suggestion.suggested_cafe = Some(CafeType::Cosmique);
                return Some(suggestion);
            }
            EpistemicState::Incertain => {
                // Route to someone fresh: available, not among the recent
                // speakers, not the current sender. Falls through when
                // nobody qualifies.
                let recent: Vec<&str> = session
                    .messages
                    .iter()
                    .rev()
                    .take(RECENT_SPEAKER_WINDOW)
                    .map(|m| m.sender.as_str())
                    .collect();
                let candidate = session.config.participants.iter().find(|p| {
                    p.available && !recent.contains(&p.name.as_str()) && p.name != *sender
                });
                if let Some(participant) = candidate {
                    let mut suggestion = Suggestion::new(
                        SuggestionKind::Routing,
                        format!("{sender} est incertain. Demander à {} ?", participant.name),
                        "Vérification nécessaire",
                        0.7,
                    );
                    suggestion.suggested_target = Some(participant.name.clone());
                    return Some(suggestion);
                }
            }
            EpistemicState::Recherche => {
                let specialist_available = session
                    .config
                    .participants
                    .iter()
                    .any(|p| p.name == self.research_specialist && p.available);
                if specialist_available {
                    let mut suggestion = Suggestion::new(
                        SuggestionKind::Routing,
                        format!(
                            "{sender} a besoin de rechercher. Router vers {} ?",
                            self.research_specialist
                        ),
                        "État recherche détecté",
                        0.9,
                    );
                    suggestion.suggested_target = Some(self.research_specialist.clone());
                    return Some(suggestion);
                }
            }
            EpistemicState::Certitude | EpistemicState::Probable => {}
        }

        // Last resort: a question with an explicit target in the raw text.
        let questions = self.detector.detect(&latest.raw_text);
        if let Some(question) = questions.first() {
            if let Some(target) = &question.target {
                let mut suggestion = Suggestion::new(
                    SuggestionKind::Routing,
                    format!("Question détectée pour {target}"),
                    &format!("Question explicite : {}", question.question_text),
                    question.confidence,
                );
                suggestion.suggested_target = Some(target.clone());
                return Some(suggestion);
            }
        }

        None
    }
}
