//! Question detection — ordered regex patterns over raw message text.
//!
//! Runs on every inbound message regardless of envelope parse success.
//! Overlapping patterns intentionally produce duplicate detections; callers
//! that only care about "is there a targeted question" take the first one.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which pattern produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPattern {
    /// Text ending with `?`.
    TrailingQuestionMark,
    /// Explicit `[@ name]` mention.
    ExplicitMention,
    /// Modal phrasing ("peux-tu", "pourriez-vous", ...).
    ModalPhrase,
    /// Interrogative word ("comment", "pourquoi", ...).
    Interrogative,
    /// Opinion solicitation ("qu'en penses-tu", "votre avis", ...).
    OpinionRequest,
}

/// A question found in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetection {
    /// The enclosing sentence, trimmed.
    pub question_text: String,
    /// First explicit `[@ name]` mention in the whole text, shared across
    /// all detections for that text.
    pub target: Option<String>,
    /// 0.8 when the sentence carries a literal `?`, else 0.6.
    pub confidence: f32,
    pub pattern: QuestionPattern,
}

/// Detector holding the compiled, ordered pattern list.
pub struct QuestionDetector {
    patterns: Vec<(QuestionPattern, Regex)>,
    mention: Regex,
}

impl Default for QuestionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionDetector {
    pub fn new() -> Self {
        let patterns = vec![
            // A single trailing newline after the "?" still counts.
            (
                QuestionPattern::TrailingQuestionMark,
                Regex::new(r"\?\n?$").unwrap(),
            ),
            (
                QuestionPattern::ExplicitMention,
                Regex::new(r"\[@ (\w+)\]").unwrap(),
            ),
            (
                QuestionPattern::ModalPhrase,
                Regex::new(r"(?i)(?:peux-tu|pourrais-tu|pourriez-vous|pouvez-vous)").unwrap(),
            ),
            (
                QuestionPattern::Interrogative,
                Regex::new(r"(?i)(?:comment|pourquoi|quand|où|qui|quoi)").unwrap(),
            ),
            (
                QuestionPattern::OpinionRequest,
                Regex::new(r"(?i)(?:qu'en penses-tu|qu'en pensez-vous|votre avis)").unwrap(),
            ),
        ];
        Self {
            patterns,
            mention: Regex::new(r"\[@ (\w+)\]").unwrap(),
        }
    }

    /// Scan `text` and return every detection, in pattern-list order then
    /// match order.
    pub fn detect(&self, text: &str) -> Vec<QuestionDetection> {
        let target = self.mention.captures(text).map(|c| c[1].to_string());

        let mut detections = Vec::new();
        for (pattern, regex) in &self.patterns {
            for found in regex.find_iter(text) {
                // Recover the enclosing sentence: scan back to the previous
                // "." (or start) and forward to the next "." (or end).
                let start = text[..found.start()].rfind('.').map_or(0, |i| i + 1);
                let end = text[found.end()..]
                    .find('.')
                    .map_or(text.len(), |i| found.end() + i);
                let question_text = text[start..end].trim().to_string();

                let confidence = if question_text.contains('?') { 0.8 } else { 0.6 };
                detections.push(QuestionDetection {
                    question_text,
                    target: target.clone(),
                    confidence,
                    pattern: *pattern,
                });
            }
        }
        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_question_mark_is_detected() {
        let detector = QuestionDetector::new();
        let detections = detector.detect("Le protocole est-il valide ?");
        assert!(!detections.is_empty());
        assert_eq!(detections[0].pattern, QuestionPattern::TrailingQuestionMark);
        assert_eq!(detections[0].confidence, 0.8);
        assert!(detections[0].target.is_none());
    }

    #[test]
    fn trailing_newline_after_question_mark_still_counts() {
        let detector = QuestionDetector::new();
        let detections = detector.detect("Le protocole est-il valide ?\n");
        assert!(
            detections
                .iter()
                .any(|d| d.pattern == QuestionPattern::TrailingQuestionMark)
        );
        assert_eq!(detections[0].confidence, 0.8);
    }

    #[test]
    fn plain_statement_yields_nothing() {
        let detector = QuestionDetector::new();
        assert!(detector.detect("Le ciel est bleu.").is_empty());
    }

    #[test]
    fn explicit_mention_sets_shared_target() {
        let detector = QuestionDetector::new();
        let detections =
            detector.detect("[@ Claude] peux-tu vérifier la source ?");
        assert!(!detections.is_empty());
        for d in &detections {
            assert_eq!(d.target.as_deref(), Some("Claude"));
        }
    }

    #[test]
    fn first_mention_wins_for_target() {
        let detector = QuestionDetector::new();
        let detections = detector.detect("[@ Claude] et [@ Mistral], votre avis ?");
        assert!(!detections.is_empty());
        assert_eq!(detections[0].target.as_deref(), Some("Claude"));
    }

    #[test]
    fn sentence_is_recovered_between_periods() {
        let detector = QuestionDetector::new();
        let text = "Voici le contexte. Comment expliquer ce résultat. Fin du message.";
        let detections = detector.detect(text);
        let interrogative = detections
            .iter()
            .find(|d| d.pattern == QuestionPattern::Interrogative)
            .unwrap();
        assert_eq!(interrogative.question_text, "Comment expliquer ce résultat");
        assert_eq!(interrogative.confidence, 0.6);
    }

    #[test]
    fn modal_phrase_without_question_mark_has_lower_confidence() {
        let detector = QuestionDetector::new();
        let detections = detector.detect("Peux-tu creuser la piste");
        let modal = detections
            .iter()
            .find(|d| d.pattern == QuestionPattern::ModalPhrase)
            .unwrap();
        assert_eq!(modal.confidence, 0.6);
    }

    #[test]
    fn overlapping_patterns_yield_duplicates() {
        let detector = QuestionDetector::new();
        // Matches both the modal pattern and the trailing "?"
        let detections = detector.detect("Peux-tu confirmer ?");
        let patterns: Vec<_> = detections.iter().map(|d| d.pattern).collect();
        assert!(patterns.contains(&QuestionPattern::TrailingQuestionMark));
        assert!(patterns.contains(&QuestionPattern::ModalPhrase));
        assert!(detections.len() >= 2);
    }

    #[test]
    fn detections_follow_pattern_list_order() {
        let detector = QuestionDetector::new();
        let detections = detector.detect("[@ ChatGPT] pourquoi ce choix ?");
        // Trailing "?" is the first pattern in the list, so it comes first.
        assert_eq!(detections[0].pattern, QuestionPattern::TrailingQuestionMark);
        let mention_pos = detections
            .iter()
            .position(|d| d.pattern == QuestionPattern::ExplicitMention)
            .unwrap();
        let interrogative_pos = detections
            .iter()
            .position(|d| d.pattern == QuestionPattern::Interrogative)
            .unwrap();
        assert!(mention_pos < interrogative_pos);
    }
}
