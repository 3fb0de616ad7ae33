//! Epistemic state classifier — a bag-of-patterns scorer.
//!
//! Each state owns a short list of marker patterns; every match anywhere in
//! the text adds 0.3 to that state's score. No negation handling, no context
//! window. Text matching nothing defaults to (probable, 0.5).

use regex::Regex;

use crate::session::model::EpistemicState;

/// Score contributed by a single pattern match.
const MATCH_WEIGHT: f32 = 0.3;
/// Confidence reported when no pattern matches at all.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Classifier holding one pattern list per state, in state declaration
/// order (ties resolve to the first state encountered).
pub struct StateClassifier {
    table: Vec<(EpistemicState, Vec<Regex>)>,
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StateClassifier {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
                .collect()
        };

        let table = vec![
            (
                EpistemicState::Certitude,
                compile(&[
                    r"(?:selon|d'après|basé sur|documentation)",
                    r"(?:confirmé|vérifié|prouvé|établi)",
                    r"(?:définitivement|certainement|assurément)",
                ]),
            ),
            (
                EpistemicState::Probable,
                compile(&[
                    r"(?:probablement|vraisemblablement|sans doute)",
                    r"(?:il est probable|il semble que)",
                    r"(?:haute confiance)",
                ]),
            ),
            (
                EpistemicState::Incertain,
                compile(&[
                    r"(?:je ne suis pas sûr|incertain|pas certain)",
                    r"(?:peut-être|possiblement)",
                    r"(?:nécessite validation|à vérifier)",
                ]),
            ),
            (
                EpistemicState::Intuition,
                compile(&[
                    r"(?:intuition|pressentiment)",
                    r"(?:j'ai le sentiment que|je sens que)",
                    r"(?:spéculation|hypothèse créative)",
                ]),
            ),
            (
                EpistemicState::Oracle,
                compile(&[
                    r"(?:breakthrough|percée|découverte)",
                    r"(?:eureka|révélation)",
                    r"(?:moment clé)",
                ]),
            ),
            (
                EpistemicState::Recherche,
                compile(&[
                    r"(?:je ne sais pas|laissez-moi vérifier)",
                    r"(?:rechercher|vérifier)",
                    r"(?:je dois consulter)",
                ]),
            ),
        ];

        Self { table }
    }

    /// Score `text` against every state and return the best match.
    ///
    /// Deterministic: identical input always yields identical output.
    pub fn classify(&self, text: &str) -> (EpistemicState, f32) {
        let mut best: Option<EpistemicState> = None;
        let mut best_score = 0.0f32;

        for (state, patterns) in &self.table {
            let matches: usize = patterns.iter().map(|re| re.find_iter(text).count()).sum();
            let score = matches as f32 * MATCH_WEIGHT;
            // Strict comparison keeps the first state on exact ties.
            if score > best_score {
                best_score = score;
                best = Some(*state);
            }
        }

        match best {
            Some(state) => (state, best_score.min(1.0)),
            None => (EpistemicState::Probable, DEFAULT_CONFIDENCE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_text_defaults_to_probable() {
        let classifier = StateClassifier::new();
        assert_eq!(
            classifier.classify("Bonjour tout le monde"),
            (EpistemicState::Probable, 0.5)
        );
    }

    #[test]
    fn certainty_markers_score_certitude() {
        let classifier = StateClassifier::new();
        let (state, confidence) =
            classifier.classify("Selon la documentation, c'est confirmé et prouvé.");
        assert_eq!(state, EpistemicState::Certitude);
        assert!(confidence > 0.5);
    }

    #[test]
    fn breakthrough_language_scores_oracle() {
        let classifier = StateClassifier::new();
        let (state, _) = classifier.classify("Eureka, c'est une percée majeure");
        assert_eq!(state, EpistemicState::Oracle);
    }

    #[test]
    fn hedged_text_scores_incertain() {
        let classifier = StateClassifier::new();
        let (state, _) = classifier.classify("Je ne suis pas sûr, peut-être, à confirmer");
        assert_eq!(state, EpistemicState::Incertain);
    }

    #[test]
    fn score_accumulates_per_match() {
        let classifier = StateClassifier::new();
        // One certainty marker: 1 × 0.3
        let (_, one) = classifier.classify("C'est confirmé");
        assert!((one - 0.3).abs() < f32::EPSILON);
        // Two markers: 2 × 0.3
        let (_, two) = classifier.classify("C'est confirmé et prouvé");
        assert!((two - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn confidence_is_clamped_to_one() {
        let classifier = StateClassifier::new();
        let (state, confidence) = classifier
            .classify("confirmé vérifié prouvé établi certainement assurément définitivement");
        assert_eq!(state, EpistemicState::Certitude);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn exact_ties_resolve_to_declaration_order() {
        let classifier = StateClassifier::new();
        // One certitude marker and one recherche marker: tie at 0.3,
        // certitude is declared first.
        let (state, _) = classifier.classify("C'est prouvé mais je dois consulter mes notes");
        assert_eq!(state, EpistemicState::Certitude);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = StateClassifier::new();
        let text = "J'ai le sentiment que cette hypothèse créative tient la route";
        let first = classifier.classify(text);
        for _ in 0..10 {
            assert_eq!(classifier.classify(text), first);
        }
    }

    #[test]
    fn case_insensitive_matching() {
        let classifier = StateClassifier::new();
        let (state, _) = classifier.classify("SELON LA DOCUMENTATION");
        assert_eq!(state, EpistemicState::Certitude);
    }
}
