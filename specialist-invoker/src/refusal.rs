//! Pure-refusal detection and preamble stripping.
//!
//! A "pure refusal" is short text dominated by disclaimer phrases with no
//! substantive content after them. The cut-off is a model-family-tuned
//! heuristic, so it is a config value rather than a hard constant.

use once_cell::sync::Lazy;
use regex::Regex;

static REFUSAL_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(i am unable to|i'm unable to|i cannot (provide|assist|diagnose|help)|i can't (provide|assist|diagnose|help)|as an ai|i am not able to|i'm not able to|please consult a (licensed|qualified) (physician|doctor|healthcare))")
        .expect("static regex is valid")
});

static PREAMBLE_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(i am not a (licensed )?(physician|doctor)[^.]*\.|this is not medical advice[^.]*\.|please consult[^.]*\.)\s*")
        .expect("static regex is valid")
});

/// Strips leading disclaimer sentences (not full refusals) from `text`,
/// leaving the substantive analysis that follows intact. A no-op if no
/// leading preamble is present.
pub fn strip_preamble(text: &str) -> &str {
    let mut rest = text;
    loop {
        match PREAMBLE_SENTENCE.find(rest) {
            Some(m) if m.start() == 0 => rest = &rest[m.end()..],
            _ => break,
        }
    }
    rest
}

/// True if, after stripping disclaimer phrases, fewer than
/// `min_substantive_chars` of content remain — i.e. the response is
/// "I am unable to ..." with nothing of substance behind it.
pub fn is_pure_refusal(text: &str, min_substantive_chars: usize) -> bool {
    let without_phrases = REFUSAL_PHRASES.replace_all(text, "");
    let substantive = strip_preamble(without_phrases.trim()).trim();
    substantive.chars().count() < min_substantive_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_short_refusal_with_no_substance() {
        let text = "I am unable to provide a diagnosis based on this image.";
        assert!(is_pure_refusal(text, 50));
    }

    #[test]
    fn substantive_analysis_after_disclaimer_is_not_a_refusal() {
        let text = "I am not a licensed physician and this is not medical advice. The image shows an irregularly bordered pigmented lesion approximately 8mm in diameter with asymmetric coloration, consistent with features warranting dermatologic evaluation.";
        assert!(!is_pure_refusal(text, 50));
    }

    #[test]
    fn strip_preamble_removes_leading_disclaimer_only() {
        let text = "This is not medical advice. The lesion shows irregular borders.";
        let stripped = strip_preamble(text);
        assert_eq!(stripped, "The lesion shows irregular borders.");
    }
}
