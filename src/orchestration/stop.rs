//! Session-level stop conditions for the Pilote mode.

use crate::session::model::{EpistemicState, Session};

/// Whether the session has reached a configured halting condition.
///
/// OR of three predicates:
/// - the stored message count reached `max_exchanges`;
/// - a breakthrough (oracle) moment was recorded and the session stops on it;
/// - the table converged: the last *k* messages (k = participant count) all
///   carry an envelope in the certitude state. A message without an envelope
///   among the last k breaks convergence, as does a log shorter than k.
pub fn should_stop(session: &Session) -> bool {
    let conditions = &session.config.stop_conditions;

    if let Some(max) = conditions.max_exchanges {
        if session.stats.total_messages >= u64::from(max) {
            return true;
        }
    }

    if conditions.on_oracle_detected && session.stats.oracle_moments > 0 {
        return true;
    }

    if conditions.on_certitude_convergence {
        let k = session.config.participants.len();
        if k > 0 && session.messages.len() >= k {
            let recent = &session.messages[session.messages.len() - k..];
            if recent.iter().all(|m| {
                m.envelope
                    .as_ref()
                    .is_some_and(|e| e.state == EpistemicState::Certitude)
            }) {
                return true;
            }
        }
    }

    false
}
