//! Session data model — fixed vocabularies, envelope, messages, counters.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Addressee sentinel meaning "the whole table".
pub const ADDRESSEE_ALL: &str = "Tous";

// ── Fixed vocabularies ──────────────────────────────────────────────

/// The four café types a message can be served as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CafeType {
    Expresso,
    Long,
    Cosmique,
    Gourmand,
}

impl CafeType {
    pub const ALL: [CafeType; 4] = [
        CafeType::Expresso,
        CafeType::Long,
        CafeType::Cosmique,
        CafeType::Gourmand,
    ];

    /// The envelope token for this café type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CafeType::Expresso => "expresso",
            CafeType::Long => "long",
            CafeType::Cosmique => "cosmique",
            CafeType::Gourmand => "gourmand",
        }
    }
}

impl fmt::Display for CafeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CafeType {
    type Err = String;

    /// Case-insensitive token lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expresso" => Ok(CafeType::Expresso),
            "long" => Ok(CafeType::Long),
            "cosmique" => Ok(CafeType::Cosmique),
            "gourmand" => Ok(CafeType::Gourmand),
            other => Err(other.to_string()),
        }
    }
}

/// Epistemic state of a message — the confidence posture its author claims.
///
/// Declaration order is significant: the classifier resolves score ties in
/// favor of the first state in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpistemicState {
    Certitude,
    Probable,
    Incertain,
    Intuition,
    /// Breakthrough moment.
    Oracle,
    /// Research needed before answering.
    Recherche,
}

impl EpistemicState {
    pub const ALL: [EpistemicState; 6] = [
        EpistemicState::Certitude,
        EpistemicState::Probable,
        EpistemicState::Incertain,
        EpistemicState::Intuition,
        EpistemicState::Oracle,
        EpistemicState::Recherche,
    ];

    /// The envelope token for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            EpistemicState::Certitude => "certitude",
            EpistemicState::Probable => "probable",
            EpistemicState::Incertain => "incertain",
            EpistemicState::Intuition => "intuition",
            EpistemicState::Oracle => "oracle",
            EpistemicState::Recherche => "recherche",
        }
    }
}

impl fmt::Display for EpistemicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpistemicState {
    type Err = String;

    /// Case-insensitive token lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "certitude" => Ok(EpistemicState::Certitude),
            "probable" => Ok(EpistemicState::Probable),
            "incertain" => Ok(EpistemicState::Incertain),
            "intuition" => Ok(EpistemicState::Intuition),
            "oracle" => Ok(EpistemicState::Oracle),
            "recherche" => Ok(EpistemicState::Recherche),
            other => Err(other.to_string()),
        }
    }
}

/// How the next speaker is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationMode {
    /// Full manual control by the human operator.
    #[default]
    Barman,
    /// Automatic routing.
    Pilote,
    /// Advisory suggestions, validated by the operator.
    Sommelier,
}

// ── Envelope ────────────────────────────────────────────────────────

/// Parsed representation of a compliant message envelope.
///
/// Produced only by successful envelope parsing; immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender name as written in the header line.
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    /// Free-text role label (a few words).
    pub role: String,
    pub cafe_type: CafeType,
    pub state: EpistemicState,
    /// Body text between the header and the addressee line.
    pub body: String,
    /// Addressee name, or [`ADDRESSEE_ALL`].
    pub addressee: String,
    /// Follow-up question for the addressee.
    pub next_question: String,
    pub signature: String,
}

// ── Messages ────────────────────────────────────────────────────────

/// A message in a session's ordered log.
///
/// Created once per inbound text and never mutated afterward. The envelope
/// is `None` when parsing failed — the raw message is accepted regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    /// Claimed sender identity.
    pub sender: String,
    /// Explicit addressee supplied by the caller, if any.
    pub addressee: Option<String>,
    pub envelope: Option<Envelope>,
    /// Raw text as captured.
    pub raw_text: String,
    /// True when the message comes from the human operator.
    pub is_human: bool,
    /// Question texts found by the detector.
    pub detected_questions: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a bare message with a fresh ID and no envelope.
    pub fn new(session_id: &str, sender: &str, raw_text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender: sender.to_string(),
            addressee: None,
            envelope: None,
            raw_text: raw_text.to_string(),
            is_human: false,
            detected_questions: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }
}

// ── Participants ────────────────────────────────────────────────────

/// An AI (or human) seat at the table.
///
/// Participants are never deleted from a session, only flagged unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Unique within a session.
    pub name: String,
    /// Hosting platform: "chatgpt", "claude", "mistral", ...
    pub platform: String,
    pub available: bool,
    /// Estimated remaining capacity, when the platform exposes one.
    pub tokens_remaining: Option<u32>,
    /// Free role label, may change over a session.
    pub assigned_role: Option<String>,
}

impl Participant {
    pub fn new(name: &str, platform: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: platform.to_string(),
            available: true,
            tokens_remaining: None,
            assigned_role: None,
        }
    }
}

// ── Session configuration ───────────────────────────────────────────

/// Halting predicates for the Pilote mode. Set at creation, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopCondition {
    /// Stop once this many messages are stored.
    pub max_exchanges: Option<u32>,
    /// Stop when a breakthrough moment has been recorded.
    pub on_oracle_detected: bool,
    /// Stop when the table converges on certitude.
    pub on_certitude_convergence: bool,
    /// Only the operator stops the session.
    pub manual_only: bool,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self {
            max_exchanges: None,
            on_oracle_detected: false,
            on_certitude_convergence: false,
            manual_only: true,
        }
    }
}

/// Configuration of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_number: u32,
    pub subject: String,
    /// Ten-word summary.
    pub summary: String,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub mode: OrchestrationMode,
    #[serde(default)]
    pub stop_conditions: StopCondition,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(other.to_string()),
        }
    }
}

// ── Counters ────────────────────────────────────────────────────────

/// Running per-session counters, monotonically non-decreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_messages: u64,
    pub messages_per_participant: HashMap<String, u64>,
    pub states_distribution: HashMap<EpistemicState, u64>,
    pub oracle_moments: u64,
    pub questions_detected: u64,
    pub duration_minutes: f64,
}

impl SessionStats {
    /// Zeroed counters, pre-seeded for every participant and every state.
    pub fn seeded(participants: &[Participant]) -> Self {
        Self {
            messages_per_participant: participants
                .iter()
                .map(|p| (p.name.clone(), 0))
                .collect(),
            states_distribution: EpistemicState::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Self::default()
        }
    }

    /// Bump counters for an accepted message.
    ///
    /// State counters move only when the message carries an envelope.
    pub fn record(&mut self, message: &Message) {
        self.total_messages += 1;
        *self
            .messages_per_participant
            .entry(message.sender.clone())
            .or_insert(0) += 1;

        if let Some(envelope) = &message.envelope {
            *self.states_distribution.entry(envelope.state).or_insert(0) += 1;
            if envelope.state == EpistemicState::Oracle {
                self.oracle_moments += 1;
            }
        }

        self.questions_detected += message.detected_questions.len() as u64;
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// A complete session: configuration, message log, counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    #[serde(default)]
    pub status: SessionStatus,
    pub stats: SessionStats,
    /// Ordered message log.
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh active session with seeded counters.
    pub fn new(config: SessionConfig) -> Self {
        let now = Utc::now();
        let stats = SessionStats::seeded(&config.participants);
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            status: SessionStatus::Active,
            stats,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cafe_type_tokens_round_trip() {
        for cafe in CafeType::ALL {
            assert_eq!(cafe.as_str().parse::<CafeType>(), Ok(cafe));
        }
    }

    #[test]
    fn cafe_type_parse_is_case_insensitive() {
        assert_eq!("ExPrEsSo".parse::<CafeType>(), Ok(CafeType::Expresso));
        assert_eq!(" COSMIQUE ".parse::<CafeType>(), Ok(CafeType::Cosmique));
    }

    #[test]
    fn state_tokens_round_trip() {
        for state in EpistemicState::ALL {
            assert_eq!(state.as_str().parse::<EpistemicState>(), Ok(state));
        }
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!("ristretto".parse::<CafeType>().is_err());
        assert!("dubitatif".parse::<EpistemicState>().is_err());
    }

    #[test]
    fn seeded_stats_cover_roster_and_states() {
        let participants = vec![
            Participant::new("Claude", "claude"),
            Participant::new("ChatGPT", "chatgpt"),
        ];
        let stats = SessionStats::seeded(&participants);
        assert_eq!(stats.messages_per_participant.len(), 2);
        assert_eq!(stats.states_distribution.len(), 6);
        assert_eq!(stats.total_messages, 0);
    }

    #[test]
    fn record_bumps_counters() {
        let mut stats = SessionStats::default();
        let mut msg = Message::new("s1", "Claude", "raw");
        msg.detected_questions = vec!["q1".into(), "q2".into()];
        msg.envelope = Some(Envelope {
            sender: "Claude".into(),
            timestamp: Utc::now(),
            role: "analyste".into(),
            cafe_type: CafeType::Expresso,
            state: EpistemicState::Oracle,
            body: "eureka".into(),
            addressee: ADDRESSEE_ALL.into(),
            next_question: String::new(),
            signature: String::new(),
        });

        stats.record(&msg);

        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.messages_per_participant["Claude"], 1);
        assert_eq!(stats.states_distribution[&EpistemicState::Oracle], 1);
        assert_eq!(stats.oracle_moments, 1);
        assert_eq!(stats.questions_detected, 2);
    }

    #[test]
    fn record_without_envelope_skips_state_counters() {
        let mut stats = SessionStats::default();
        let msg = Message::new("s1", "Claude", "plain text");
        stats.record(&msg);
        assert_eq!(stats.total_messages, 1);
        assert!(stats.states_distribution.is_empty());
        assert_eq!(stats.oracle_moments, 0);
    }

    #[test]
    fn state_map_serializes_with_string_keys() {
        let mut stats = SessionStats::default();
        stats.states_distribution.insert(EpistemicState::Oracle, 3);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["states_distribution"]["oracle"], 3);
    }
}
