//! Numeric-with-unit extraction and lab-name proximity matching,
//! sharing the regex/lexicon idiom the lab parser uses for row scoring.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches values like `8.2 g/dL`, `847 ng/mL`, `18.2 x10^9/L`.
static NUMERIC_WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<value>-?\d+(?:\.\d+)?)\s*(?P<unit>(?:x?10[\^⁹³]\d?/(?:u?[lL]))|(?:[a-zA-Z%µu]+/[a-zA-Z]+)|%)")
        .expect("static regex is valid")
});

const CONTEXT_WINDOW_CHARS: usize = 30;

/// A numeric value with its unit and the lab-name context found near it
/// in the source text, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericWithUnit {
    pub value: f64,
    pub unit: String,
    pub context: String,
}

/// Extracts every numeric-with-unit occurrence in `text`, each paired
/// with a ± `CONTEXT_WINDOW_CHARS` window of surrounding text used for
/// lab-name proximity matching.
pub fn extract_numeric_with_unit(text: &str) -> Vec<NumericWithUnit> {
    let chars: Vec<char> = text.chars().collect();
    let char_byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();

    NUMERIC_WITH_UNIT
        .captures_iter(text)
        .filter_map(|caps| {
            let value_match = caps.name("value")?;
            let unit_match = caps.name("unit")?;
            let value: f64 = value_match.as_str().parse().ok()?;
            let unit = unit_match.as_str().to_string();

            let match_char_start = char_byte_offsets
                .iter()
                .position(|&b| b == value_match.start())
                .unwrap_or(0);
            let match_char_end = char_byte_offsets
                .iter()
                .position(|&b| b >= unit_match.end())
                .unwrap_or(chars.len());

            let window_start = match_char_start.saturating_sub(CONTEXT_WINDOW_CHARS);
            let window_end = (match_char_end + CONTEXT_WINDOW_CHARS).min(chars.len());
            let context: String = chars[window_start..window_end].iter().collect();

            Some(NumericWithUnit { value, unit, context })
        })
        .collect()
}

/// True if any of `allowed_lab_names` appears (case-insensitively) in
/// `context`.
pub fn context_matches_known_lab_name(context: &str, allowed_lab_names: &[String]) -> bool {
    let lowered = context.to_lowercase();
    allowed_lab_names
        .iter()
        .any(|name| lowered.contains(&name.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_value_and_unit_with_context() {
        let text = "The patient's hemoglobin was 8.2 g/dL on admission.";
        let found = extract_numeric_with_unit(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 8.2);
        assert_eq!(found[0].unit, "g/dL");
        assert!(found[0].context.contains("hemoglobin"));
    }

    #[test]
    fn extracts_exponent_notation_units() {
        let text = "WBC count 18.2 x10^9/L, elevated.";
        let found = extract_numeric_with_unit(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 18.2);
    }

    #[test]
    fn context_matching_is_case_insensitive() {
        let allowed = vec!["Hemoglobin".to_string()];
        assert!(context_matches_known_lab_name("patient HEMOGLOBIN was low", &allowed));
    }

    #[test]
    fn multiple_values_are_all_extracted() {
        let text = "Troponin 0.8 ng/mL and creatinine 1.1 mg/dL were both elevated.";
        let found = extract_numeric_with_unit(text);
        assert_eq!(found.len(), 2);
    }
}
