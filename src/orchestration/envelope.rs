//! Envelope grammar — the one bit-exact external contract.
//!
//! Every participant (human or AI) composes messages in this fixed format:
//!
//! ```text
//! [Début de réponse]
//! [<sender>]-[<dd/mm/yyyy HH:MM:SS>] - [<role>] - [<café>] - [<état>]
//!
//! <body>
//!
//! [@ <addressee>] "<follow-up question>"
//! [<sender>] - <signature>
//! [Fin de réponse]
//! ```
//!
//! Parsing is deliberately forgiving: a malformed envelope is a soft
//! failure (the message is still accepted raw), an identity mismatch is a
//! warning, and an unparseable timestamp falls back to the current time.

use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::error::EnvelopeError;
use crate::session::model::{ADDRESSEE_ALL, Envelope};

/// Literal opening marker.
pub const OPENING_MARKER: &str = "[Début de réponse]";
/// Literal closing marker.
pub const CLOSING_MARKER: &str = "[Fin de réponse]";
/// Envelope timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Parser for the envelope grammar.
pub struct EnvelopeParser {
    header: Regex,
    addressee: Regex,
    signature: Regex,
}

impl Default for EnvelopeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeParser {
    pub fn new() -> Self {
        Self {
            // [sender]-[timestamp] - [role] - [café] - [état]
            header: Regex::new(r"\[(.+?)\]-\[(.+?)\] - \[(.+?)\] - \[(.+?)\] - \[(.+?)\]")
                .unwrap(),
            // [@ addressee] "question"
            addressee: Regex::new(r#"\[@ (.+?)\] "(.+?)""#).unwrap(),
            // [sender] - signature, immediately before the closing marker
            signature: Regex::new(r"\[.+?\] - (.+?)\s*\[Fin de réponse\]").unwrap(),
        }
    }

    /// Parse a raw envelope claimed to come from `claimed_sender`.
    ///
    /// A header sender that differs from the claimed sender is an
    /// impersonation signal: logged as a warning, parsing continues.
    pub fn parse(&self, raw: &str, claimed_sender: &str) -> Result<Envelope, EnvelopeError> {
        if !raw.contains(OPENING_MARKER) || !raw.contains(CLOSING_MARKER) {
            return Err(EnvelopeError::MissingMarkers);
        }

        let caps = self
            .header
            .captures(raw)
            .ok_or(EnvelopeError::MissingHeader)?;
        let header_end = caps.get(0).map_or(0, |m| m.end());

        let sender = caps[1].trim().to_string();
        if sender != claimed_sender.trim() {
            warn!(
                claimed = claimed_sender,
                header = %sender,
                "envelope header sender does not match submitting participant"
            );
        }

        let cafe_type = caps[4]
            .parse()
            .map_err(EnvelopeError::UnknownCafeType)?;
        let state = caps[5].parse().map_err(EnvelopeError::UnknownState)?;

        // Body runs from the end of the header to the addressee marker,
        // or to the closing marker when no addressee line is present.
        let body_end = raw[header_end..]
            .find("[@ ")
            .or_else(|| raw[header_end..].find(CLOSING_MARKER))
            .map_or(raw.len(), |i| header_end + i);
        let body = raw[header_end..body_end].trim().to_string();

        let (addressee, next_question) = match self.addressee.captures(raw) {
            Some(c) => (c[1].trim().to_string(), c[2].trim().to_string()),
            None => (ADDRESSEE_ALL.to_string(), String::new()),
        };

        let signature = self
            .signature
            .captures(raw)
            .map_or_else(String::new, |c| c[1].trim().to_string());

        // Unparseable timestamps are substituted, never fatal.
        let timestamp = NaiveDateTime::parse_from_str(caps[2].trim(), TIMESTAMP_FORMAT)
            .map_or_else(|_| Utc::now(), |naive| naive.and_utc());

        Ok(Envelope {
            sender,
            timestamp,
            role: caps[3].trim().to_string(),
            cafe_type,
            state,
            body,
            addressee,
            next_question,
            signature,
        })
    }
}

impl Envelope {
    /// Render this envelope back into the wire grammar.
    pub fn to_envelope_text(&self) -> String {
        [
            OPENING_MARKER.to_string(),
            format!(
                "[{}]-[{}] - [{}] - [{}] - [{}]",
                self.sender,
                self.timestamp.format(TIMESTAMP_FORMAT),
                self.role,
                self.cafe_type,
                self.state
            ),
            String::new(),
            self.body.clone(),
            String::new(),
            format!("[@ {}] \"{}\"", self.addressee, self.next_question),
            format!("[{}] - {}", self.sender, self.signature),
            CLOSING_MARKER.to_string(),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{CafeType, EpistemicState};
    use chrono::TimeZone;

    fn sample_text() -> String {
        [
            "[Début de réponse]",
            "[Claude]-[07/03/2025 21:15:42] - [analyste critique] - [expresso] - [certitude]",
            "",
            "Selon la documentation, le protocole est confirmé.",
            "",
            "[@ ChatGPT] \"Peux-tu valider cette lecture ?\"",
            "[Claude] - La rigueur avant tout",
            "[Fin de réponse]",
        ]
        .join("\n")
    }

    #[test]
    fn parses_complete_envelope() {
        let parser = EnvelopeParser::new();
        let env = parser.parse(&sample_text(), "Claude").unwrap();

        assert_eq!(env.sender, "Claude");
        assert_eq!(env.role, "analyste critique");
        assert_eq!(env.cafe_type, CafeType::Expresso);
        assert_eq!(env.state, EpistemicState::Certitude);
        assert_eq!(env.body, "Selon la documentation, le protocole est confirmé.");
        assert_eq!(env.addressee, "ChatGPT");
        assert_eq!(env.next_question, "Peux-tu valider cette lecture ?");
        assert_eq!(env.signature, "La rigueur avant tout");
        assert_eq!(
            env.timestamp,
            Utc.with_ymd_and_hms(2025, 3, 7, 21, 15, 42).unwrap()
        );
    }

    #[test]
    fn missing_markers_is_soft_failure() {
        let parser = EnvelopeParser::new();
        assert_eq!(
            parser.parse("just some plain text", "Claude"),
            Err(EnvelopeError::MissingMarkers)
        );
        // Opening marker alone is not enough
        let partial = format!("{OPENING_MARKER}\nhello");
        assert_eq!(
            parser.parse(&partial, "Claude"),
            Err(EnvelopeError::MissingMarkers)
        );
    }

    #[test]
    fn missing_header_fails() {
        let parser = EnvelopeParser::new();
        let text = format!("{OPENING_MARKER}\nno header here\n{CLOSING_MARKER}");
        assert_eq!(
            parser.parse(&text, "Claude"),
            Err(EnvelopeError::MissingHeader)
        );
    }

    #[test]
    fn unknown_cafe_or_state_fails() {
        let parser = EnvelopeParser::new();
        let bad_cafe = sample_text().replace("[expresso]", "[ristretto]");
        assert_eq!(
            parser.parse(&bad_cafe, "Claude"),
            Err(EnvelopeError::UnknownCafeType("ristretto".into()))
        );
        let bad_state = sample_text().replace("[certitude]", "[dubitatif]");
        assert_eq!(
            parser.parse(&bad_state, "Claude"),
            Err(EnvelopeError::UnknownState("dubitatif".into()))
        );
    }

    #[test]
    fn tokens_parse_case_insensitively() {
        let parser = EnvelopeParser::new();
        let text = sample_text()
            .replace("[expresso]", "[EXPRESSO]")
            .replace("[certitude]", "[Certitude]");
        let env = parser.parse(&text, "Claude").unwrap();
        assert_eq!(env.cafe_type, CafeType::Expresso);
        assert_eq!(env.state, EpistemicState::Certitude);
    }

    #[test]
    fn identity_mismatch_still_parses() {
        let parser = EnvelopeParser::new();
        // Mistral submits a message whose header claims Claude
        let env = parser.parse(&sample_text(), "Mistral").unwrap();
        assert_eq!(env.sender, "Claude");
    }

    #[test]
    fn missing_addressee_defaults_to_everyone() {
        let parser = EnvelopeParser::new();
        let text = [
            "[Début de réponse]",
            "[Claude]-[07/03/2025 21:15:42] - [analyste] - [long] - [probable]",
            "",
            "Il semble que la piste soit bonne.",
            "",
            "[Claude] - Sans façon",
            "[Fin de réponse]",
        ]
        .join("\n");
        let env = parser.parse(&text, "Claude").unwrap();
        assert_eq!(env.addressee, ADDRESSEE_ALL);
        assert_eq!(env.next_question, "");
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let parser = EnvelopeParser::new();
        let text = sample_text().replace("07/03/2025 21:15:42", "pas une date");
        let before = Utc::now();
        let env = parser.parse(&text, "Claude").unwrap();
        assert!(env.timestamp >= before);
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let parser = EnvelopeParser::new();
        let env = Envelope {
            sender: "Mistral".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 12, 1, 8, 5, 0).unwrap(),
            role: "poète pragmatique".into(),
            cafe_type: CafeType::Cosmique,
            state: EpistemicState::Intuition,
            body: "J'ai le sentiment que la réponse est ailleurs.".into(),
            addressee: "Claude".into(),
            next_question: "Qu'en penses-tu ?".into(),
            signature: "Entre deux nuages".into(),
        };

        let reparsed = parser.parse(&env.to_envelope_text(), "Mistral").unwrap();
        assert_eq!(reparsed, env);
    }
}
