//! Session lifecycle and bookkeeping over the persistence layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, SessionError};
use crate::orchestration::flow::{ConversationFlow, FlowEdge};
use crate::session::model::{
    CafeType, EpistemicState, Message, Session, SessionConfig, SessionStatus,
};
use crate::store::Database;

/// A breakthrough moment, extracted from the message log for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct OracleMoment {
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    /// Opening of the message body.
    pub excerpt: String,
}

/// Detailed statistics for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub session_id: String,
    pub subject: String,
    pub status: SessionStatus,
    pub total_messages: u64,
    pub messages_per_participant: HashMap<String, u64>,
    pub states_distribution: HashMap<EpistemicState, u64>,
    pub questions_detected: u64,
    /// How many messages were served as each café.
    pub cafes_served: HashMap<CafeType, u64>,
    pub oracle_moments: Vec<OracleMoment>,
    /// Flow graph rebuilt from the stored message log.
    pub flow: ConversationFlow,
    pub busiest_pair: Option<FlowEdge>,
    pub duration_minutes: f64,
}

impl SessionStatistics {
    /// Shareable text recap of the session ("pitch" view).
    pub fn to_pitch_format(&self) -> String {
        let mut per_participant: Vec<_> = self.messages_per_participant.iter().collect();
        per_participant.sort_by(|a, b| a.0.cmp(b.0));
        let participation = per_participant
            .iter()
            .map(|(name, count)| format!("  - {name}: {count} messages"))
            .collect::<Vec<_>>()
            .join("\n");

        let state = |s: EpistemicState| self.states_distribution.get(&s).copied().unwrap_or(0);
        let cafe = |c: CafeType| self.cafes_served.get(&c).copied().unwrap_or(0);

        let oracle_lines = self
            .oracle_moments
            .iter()
            .map(|m| format!("- {} à {}", m.sender, m.timestamp.format("%H:%M:%S")))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "# Session {} - Statistiques\n\n\
             ## Participation\n\
             - **Total de messages**: {}\n\
             - **IAs actives**: {}\n\
             - **Distribution par IA**:\n{}\n\n\
             ## États\n\
             - 🟢 **Certitude**: {}\n\
             - 🟡 **Probable**: {}\n\
             - 🟠 **Incertain**: {}\n\
             - 🔵 **Intuition**: {}\n\
             - 🔮 **Oracle**: {} ⭐\n\
             - 🔍 **Recherche**: {}\n\n\
             ## Moments Oracle ⭐\n{}\n\n\
             ## Collaboration\n\
             - **Questions détectées**: {}\n\
             - **Cafés servis**:\n\
             \x20 - ☕ Expresso: {}\n\
             \x20 - ☕ Long: {}\n\
             \x20 - ☕ Cosmique: {}\n\
             \x20 - 🍰 Gourmand: {}\n\n\
             ## Durée\n\
             ⏱️ {:.1} minutes\n",
            self.session_id,
            self.total_messages,
            self.messages_per_participant.len(),
            participation,
            state(EpistemicState::Certitude),
            state(EpistemicState::Probable),
            state(EpistemicState::Incertain),
            state(EpistemicState::Intuition),
            state(EpistemicState::Oracle),
            state(EpistemicState::Recherche),
            oracle_lines,
            self.questions_detected,
            cafe(CafeType::Expresso),
            cafe(CafeType::Long),
            cafe(CafeType::Cosmique),
            cafe(CafeType::Gourmand),
            self.duration_minutes,
        )
    }
}

/// Session operations over any `Database` backend.
///
/// All mutations load, modify, and persist the session; callers serialize
/// concurrent submissions for the same session (the API layer holds a
/// per-session lock).
#[derive(Clone)]
pub struct SessionService {
    db: Arc<dyn Database>,
}

impl SessionService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create a session with zeroed, roster-seeded counters.
    pub async fn create(&self, config: SessionConfig) -> Result<Session> {
        let session = Session::new(config);
        self.db.insert_session(&session).await?;
        info!(
            id = %session.id,
            subject = %session.config.subject,
            participants = session.config.participants.len(),
            "Session created"
        );
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Session> {
        self.db
            .get_session(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }

    pub async fn list(
        &self,
        limit: usize,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        Ok(self.db.list_sessions(limit, status).await?)
    }

    pub async fn find_active(&self) -> Result<Option<Session>> {
        Ok(self.db.find_active_session().await?)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Session>> {
        Ok(self.db.search_sessions(query).await?)
    }

    /// Append a message and bump the session counters.
    ///
    /// The message is always accepted; counters involving the epistemic
    /// state move only when it carries an envelope.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<Message> {
        let mut session = self.get(session_id).await?;

        self.db.insert_message(&message).await?;
        session.stats.record(&message);
        session.updated_at = Utc::now();
        self.db.update_session(&session).await?;

        info!(
            session_id = %session_id,
            sender = %message.sender,
            has_envelope = message.envelope.is_some(),
            questions = message.detected_questions.len(),
            "Message stored"
        );
        Ok(message)
    }

    pub async fn pause(&self, id: &str) -> Result<Session> {
        self.set_status(id, SessionStatus::Paused).await
    }

    pub async fn resume(&self, id: &str) -> Result<Session> {
        self.set_status(id, SessionStatus::Active).await
    }

    /// Complete the session and record its total duration.
    pub async fn complete(&self, id: &str) -> Result<Session> {
        let mut session = self.get(id).await?;
        session.status = SessionStatus::Completed;
        session.updated_at = Utc::now();
        session.stats.duration_minutes =
            (session.updated_at - session.created_at).num_seconds() as f64 / 60.0;
        self.db.update_session(&session).await?;
        info!(id = %id, minutes = session.stats.duration_minutes, "Session completed");
        Ok(session)
    }

    async fn set_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<Session> {
        let mut session = self.get(id).await?;
        session.status = status;
        session.updated_at = Utc::now();
        self.db.update_session(&session).await?;
        info!(id = %id, status = status.as_str(), "Session status changed");
        Ok(session)
    }

    /// Flag a participant available or not. Participants are never removed.
    pub async fn update_availability(
        &self,
        session_id: &str,
        name: &str,
        available: bool,
        tokens_remaining: Option<u32>,
    ) -> Result<Session> {
        let mut session = self.get(session_id).await?;
        let participant = session
            .config
            .participants
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| SessionError::ParticipantNotFound {
                session_id: session_id.to_string(),
                name: name.to_string(),
            })?;
        participant.available = available;
        if tokens_remaining.is_some() {
            participant.tokens_remaining = tokens_remaining;
        }
        session.updated_at = Utc::now();
        self.db.update_session(&session).await?;
        Ok(session)
    }

    /// Build detailed statistics from the stored session and its log.
    pub async fn statistics(&self, id: &str) -> Result<SessionStatistics> {
        let session = self.get(id).await?;

        let mut cafes_served: HashMap<CafeType, u64> =
            CafeType::ALL.iter().map(|c| (*c, 0)).collect();
        let mut oracle_moments = Vec::new();
        let mut flow = ConversationFlow::new(id);

        for message in &session.messages {
            if let Some(envelope) = &message.envelope {
                *cafes_served.entry(envelope.cafe_type).or_insert(0) += 1;
                if envelope.state == EpistemicState::Oracle {
                    oracle_moments.push(OracleMoment {
                        sender: message.sender.clone(),
                        timestamp: message.created_at,
                        excerpt: excerpt(&envelope.body),
                    });
                }
                flow.record(&message.sender, Some(envelope.addressee.as_str()));
            } else {
                flow.record(&message.sender, message.addressee.as_deref());
            }
        }

        let end = match session.status {
            SessionStatus::Completed => session.updated_at,
            _ => Utc::now(),
        };
        let duration_minutes = (end - session.created_at).num_seconds() as f64 / 60.0;

        Ok(SessionStatistics {
            session_id: session.id.clone(),
            subject: session.config.subject.clone(),
            status: session.status,
            total_messages: session.stats.total_messages,
            messages_per_participant: session.stats.messages_per_participant.clone(),
            states_distribution: session.stats.states_distribution.clone(),
            questions_detected: session.stats.questions_detected,
            cafes_served,
            busiest_pair: flow.busiest_pair().cloned(),
            oracle_moments,
            flow,
            duration_minutes,
        })
    }
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 120;
    let mut end = body.len().min(MAX);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{
        ADDRESSEE_ALL, Envelope, Participant, StopCondition,
    };
    use crate::store::LibSqlBackend;

    async fn make_service() -> SessionService {
        let db = LibSqlBackend::new_memory().await.unwrap();
        SessionService::new(Arc::new(db))
    }

    fn make_config() -> SessionConfig {
        SessionConfig {
            session_number: 1,
            subject: "Les rêves des machines".into(),
            summary: "quatre IA discutent du rêve".into(),
            participants: vec![
                Participant::new("Claude", "claude"),
                Participant::new("ChatGPT", "chatgpt"),
                Participant::new("Perplexity", "perplexity"),
            ],
            mode: Default::default(),
            stop_conditions: StopCondition::default(),
        }
    }

    fn make_envelope(sender: &str, state: EpistemicState, addressee: &str) -> Envelope {
        Envelope {
            sender: sender.into(),
            timestamp: Utc::now(),
            role: "philosophe".into(),
            cafe_type: CafeType::Cosmique,
            state,
            body: "Une idée traverse la salle.".into(),
            addressee: addressee.into(),
            next_question: String::new(),
            signature: sender.into(),
        }
    }

    #[tokio::test]
    async fn create_seeds_counters_from_roster() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();
        assert_eq!(session.stats.messages_per_participant.len(), 3);
        assert_eq!(session.stats.messages_per_participant["Claude"], 0);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn add_message_bumps_counters_and_persists() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();

        let mut msg = Message::new(&session.id, "Claude", "brut");
        msg.envelope = Some(make_envelope("Claude", EpistemicState::Oracle, ADDRESSEE_ALL));
        msg.detected_questions = vec!["et alors ?".into()];
        service.add_message(&session.id, msg).await.unwrap();

        let loaded = service.get(&session.id).await.unwrap();
        assert_eq!(loaded.stats.total_messages, 1);
        assert_eq!(loaded.stats.messages_per_participant["Claude"], 1);
        assert_eq!(loaded.stats.oracle_moments, 1);
        assert_eq!(loaded.stats.questions_detected, 1);
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn add_message_to_unknown_session_fails() {
        let service = make_service().await;
        let msg = Message::new("absent", "Claude", "brut");
        let err = service.add_message("absent", msg).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn pause_resume_complete_lifecycle() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();

        let paused = service.pause(&session.id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let resumed = service.resume(&session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);

        let completed = service.complete(&session.id).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.stats.duration_minutes >= 0.0);
    }

    #[tokio::test]
    async fn update_availability_flags_participant() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();

        let updated = service
            .update_availability(&session.id, "ChatGPT", false, Some(1200))
            .await
            .unwrap();
        let p = updated
            .config
            .participants
            .iter()
            .find(|p| p.name == "ChatGPT")
            .unwrap();
        assert!(!p.available);
        assert_eq!(p.tokens_remaining, Some(1200));
        // The roster keeps all three seats.
        assert_eq!(updated.config.participants.len(), 3);
    }

    #[tokio::test]
    async fn update_availability_unknown_participant_fails() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();
        let err = service
            .update_availability(&session.id, "Inconnu", false, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::ParticipantNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn pitch_format_lists_participation_and_oracle_moments() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();

        let mut msg = Message::new(&session.id, "Claude", "brut");
        msg.envelope = Some(make_envelope("Claude", EpistemicState::Oracle, ADDRESSEE_ALL));
        service.add_message(&session.id, msg).await.unwrap();

        let pitch = service
            .statistics(&session.id)
            .await
            .unwrap()
            .to_pitch_format();
        assert!(pitch.contains("- **Total de messages**: 1"));
        assert!(pitch.contains("  - Claude: 1 messages"));
        assert!(pitch.contains("**Oracle**: 1"));
        assert!(pitch.contains("- Claude à "));
        assert!(pitch.contains("☕ Cosmique: 1"));
    }

    #[tokio::test]
    async fn statistics_rebuild_flow_and_oracle_moments() {
        let service = make_service().await;
        let session = service.create(make_config()).await.unwrap();

        let mut first = Message::new(&session.id, "Claude", "brut");
        first.envelope = Some(make_envelope("Claude", EpistemicState::Oracle, "ChatGPT"));
        service.add_message(&session.id, first).await.unwrap();

        let mut second = Message::new(&session.id, "ChatGPT", "brut");
        second.envelope = Some(make_envelope("ChatGPT", EpistemicState::Probable, "Claude"));
        service.add_message(&session.id, second).await.unwrap();

        // Raw message with an explicit addressee but no envelope.
        let mut third = Message::new(&session.id, "Claude", "sans enveloppe");
        third.addressee = Some("ChatGPT".into());
        service.add_message(&session.id, third).await.unwrap();

        let stats = service.statistics(&session.id).await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.cafes_served[&CafeType::Cosmique], 2);
        assert_eq!(stats.oracle_moments.len(), 1);
        assert_eq!(stats.oracle_moments[0].sender, "Claude");
        assert_eq!(stats.flow.edges.len(), 2);
        let busiest = stats.busiest_pair.unwrap();
        assert_eq!((busiest.from.as_str(), busiest.to.as_str()), ("Claude", "ChatGPT"));
        assert_eq!(busiest.count, 2);
    }
}
