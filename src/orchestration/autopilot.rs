//! Pilote mode — deterministic automatic selection of the next speaker.

use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::orchestration::questions::QuestionDetector;
use crate::orchestration::stop;
use crate::session::model::{EpistemicState, Message, Session};

/// Senders of the last N messages are skipped by the fairness rule.
const RECENT_SPEAKER_WINDOW: usize = 2;

/// The automatic routing policy.
pub struct AutoPilot {
    detector: QuestionDetector,
    research_specialist: String,
    human_operator: String,
}

impl AutoPilot {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            detector: QuestionDetector::new(),
            research_specialist: config.research_specialist.clone(),
            human_operator: config.human_operator.clone(),
        }
    }

    /// Pick the next speaker, or `None` when the session should halt or
    /// nobody is eligible.
    ///
    /// Order of precedence:
    /// 1. stop conditions;
    /// 2. an explicitly targeted question (never routed back to the human);
    /// 3. research-needed state routed to the research specialist;
    /// 4. fairness: the available non-recent participant with the fewest
    ///    messages, ties broken by roster order.
    pub fn next_speaker(&self, session: &Session, latest: &Message) -> Option<String> {
        if stop::should_stop(session) {
            debug!(session_id = %session.id, "stop condition reached, no next speaker");
            return None;
        }

        for question in self.detector.detect(&latest.raw_text) {
            if let Some(target) = question.target {
                if target != self.human_operator {
                    debug!(target = %target, "routing to explicitly questioned participant");
                    return Some(target);
                }
            }
        }

        let research_needed = latest
            .envelope
            .as_ref()
            .is_some_and(|e| e.state == EpistemicState::Recherche);
        if research_needed
            && session
                .config
                .participants
                .iter()
                .any(|p| p.name == self.research_specialist && p.available)
        {
            return Some(self.research_specialist.clone());
        }

        let recent: Vec<&str> = session
            .messages
            .iter()
            .rev()
            .take(RECENT_SPEAKER_WINDOW)
            .map(|m| m.sender.as_str())
            .collect();

        let mut chosen: Option<(&str, u64)> = None;
        for participant in &session.config.participants {
            if !participant.available || recent.contains(&participant.name.as_str()) {
                continue;
            }
            let count = session
                .stats
                .messages_per_participant
                .get(&participant.name)
                .copied()
                .unwrap_or(0);
            // Strict comparison keeps roster order on ties.
            if chosen.is_none_or(|(_, best)| count < best) {
                chosen = Some((&participant.name, count));
            }
        }

        chosen.map(|(name, _)| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{
        ADDRESSEE_ALL, CafeType, Envelope, Participant, SessionConfig, StopCondition,
    };
    use chrono::Utc;

    fn make_session(participants: &[&str]) -> Session {
        Session::new(SessionConfig {
            session_number: 1,
            subject: "Test".into(),
            summary: "test".into(),
            participants: participants
                .iter()
                .map(|n| Participant::new(n, "test"))
                .collect(),
            mode: Default::default(),
            stop_conditions: StopCondition::default(),
        })
    }

    fn push_message(session: &mut Session, sender: &str) {
        let msg = Message::new(&session.id, sender, "x");
        session.stats.record(&msg);
        session.messages.push(msg);
    }

    fn pilot() -> AutoPilot {
        AutoPilot::new(&OrchestratorConfig::default())
    }

    #[test]
    fn targeted_question_wins() {
        let session = make_session(&["Claude", "ChatGPT", "Mistral"]);
        let msg = Message::new(&session.id, "Claude", "[@ Mistral] peux-tu approfondir ?");
        assert_eq!(pilot().next_speaker(&session, &msg).as_deref(), Some("Mistral"));
    }

    #[test]
    fn question_targeting_the_human_is_skipped() {
        let mut session = make_session(&["Claude", "ChatGPT"]);
        push_message(&mut session, "Claude");
        let msg = Message::new(&session.id, "Claude", "[@ Julien] peux-tu trancher ?");
        // The human is never auto-routed; fairness picks ChatGPT instead.
        assert_eq!(pilot().next_speaker(&session, &msg).as_deref(), Some("ChatGPT"));
    }

    #[test]
    fn recherche_state_routes_to_specialist() {
        let session = make_session(&["Claude", "Perplexity"]);
        let mut msg = Message::new(&session.id, "Claude", "aucune piste pour le moment");
        msg.envelope = Some(Envelope {
            sender: "Claude".into(),
            timestamp: Utc::now(),
            role: "r".into(),
            cafe_type: CafeType::Long,
            state: EpistemicState::Recherche,
            body: "b".into(),
            addressee: ADDRESSEE_ALL.into(),
            next_question: String::new(),
            signature: String::new(),
        });
        assert_eq!(
            pilot().next_speaker(&session, &msg).as_deref(),
            Some("Perplexity")
        );
    }

    #[test]
    fn fairness_picks_least_active_non_recent() {
        let mut session = make_session(&["A", "B", "C"]);
        // A: 2 messages, B: 3, C: 1; last two speakers B then C.
        for sender in ["A", "B", "A", "B", "B", "C"] {
            push_message(&mut session, sender);
        }
        let msg = session.messages.last().cloned().unwrap();
        assert_eq!(pilot().next_speaker(&session, &msg).as_deref(), Some("A"));
    }

    #[test]
    fn fairness_ties_break_by_roster_order() {
        let mut session = make_session(&["A", "B", "C", "D"]);
        push_message(&mut session, "C");
        let msg = session.messages.last().cloned().unwrap();
        // A, B, D all have zero messages; A comes first in the roster.
        assert_eq!(pilot().next_speaker(&session, &msg).as_deref(), Some("A"));
    }

    #[test]
    fn unavailable_participants_are_excluded() {
        let mut session = make_session(&["A", "B", "C"]);
        session.config.participants[0].available = false;
        push_message(&mut session, "C");
        let msg = session.messages.last().cloned().unwrap();
        assert_eq!(pilot().next_speaker(&session, &msg).as_deref(), Some("B"));
    }

    #[test]
    fn nobody_eligible_yields_none() {
        let mut session = make_session(&["A", "B"]);
        push_message(&mut session, "A");
        push_message(&mut session, "B");
        let msg = session.messages.last().cloned().unwrap();
        // Both participants are recent speakers.
        assert!(pilot().next_speaker(&session, &msg).is_none());
    }

    #[test]
    fn stop_condition_short_circuits_everything() {
        let mut session = make_session(&["A", "B", "C"]);
        session.config.stop_conditions.max_exchanges = Some(1);
        push_message(&mut session, "A");
        let msg = Message::new(&session.id, "A", "[@ B] peux-tu continuer ?");
        assert!(pilot().next_speaker(&session, &msg).is_none());
    }
}
