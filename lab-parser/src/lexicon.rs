//! Curated analyte lexicon and the regex signals the row scorer checks
//! against. Compiled once via `once_cell` for lazily-initialized regexes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Common lab analyte names, lower-cased. Not exhaustive by design — new
/// entries get added as encountered. A name can also qualify by matching
/// `NUMERIC_WITH_UNIT` alone, so the lexicon is one of two ways in.
pub static LAB_LEXICON: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "hemoglobin", "hgb", "hematocrit", "hct", "wbc", "white blood cell", "rbc",
        "red blood cell", "platelet", "plt", "ldh", "ferritin", "glucose", "creatinine",
        "bun", "sodium", "potassium", "chloride", "bicarbonate", "co2", "calcium",
        "magnesium", "phosphorus", "albumin", "total protein", "bilirubin", "alt", "ast",
        "alp", "alkaline phosphatase", "ggt", "crp", "esr", "troponin", "bnp", "nt-probnp",
        "tsh", "t3", "t4", "free t4", "hba1c", "a1c", "cholesterol", "ldl", "hdl",
        "triglycerides", "inr", "pt", "ptt", "d-dimer", "lipase", "amylase", "uric acid",
        "vitamin d", "vitamin b12", "folate", "iron", "tibc", "transferrin saturation",
        "psa", "cea", "ca-125", "ca 19-9", "afp", "cortisol", "procalcitonin", "lactate",
    ]
    .into_iter()
    .collect()
});

/// Metadata-like field names that must never be treated as an analyte row,
/// even if they happen to be followed by a number (e.g. an age).
pub static METADATA_FIELDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "patient name", "patient", "name", "age", "sex", "gender", "dob",
        "date of birth", "mrn", "accession", "ordering physician", "specimen",
        "collected", "received", "reported", "page", "report id", "fasting",
    ]
    .into_iter()
    .collect()
});

/// Matches a number with an attached lab unit, e.g. `8.2 g/dL`,
/// `847 ng/mL`, `18.2 x10^9/L`.
pub static NUMERIC_WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(-?\d+(?:\.\d+)?)\s*(x?10\^?\d+/[a-zµμ]+l?|[a-z%]+/[a-z]+l?|mg/dl|g/dl|iu/l|u/l|ng/ml|pg/ml|mmol/l|meq/l|%|mg|ml)\b",
    )
    .expect("static regex is valid")
});

/// Matches a reference-range expression, e.g. `(4.0-10.0)` or `4.0 - 10.0`.
pub static REFERENCE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?\s*(-?\d+(?:\.\d+)?)\s*[-–—to]{1,3}\s*(-?\d+(?:\.\d+)?)\s*\)?")
        .expect("static regex is valid")
});

/// Matches a status token: `H`, `L`, `High`, `Low`, `Abnormal`.
pub static STATUS_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(H|L|HIGH|LOW|ABNORMAL|CRITICAL)\b").expect("static regex is valid")
});

/// Pipe/tab-delimited row shape: `test | result | reference | interpretation`.
pub static TABLE_FAST_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^|\t]+)[|\t]+([^|\t]+)[|\t]*([^|\t]*)[|\t]*([^|\t]*)\s*$")
        .expect("static regex is valid"));

pub fn is_known_analyte(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    LAB_LEXICON.iter().any(|known| lowered.contains(known))
}

pub fn is_metadata_field(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    METADATA_FIELDS.iter().any(|field| lowered == *field || lowered.starts_with(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_analyte_substrings() {
        assert!(is_known_analyte("Hemoglobin (Hgb)"));
        assert!(is_known_analyte("LDH"));
        assert!(!is_known_analyte("Favorite Color"));
    }

    #[test]
    fn recognizes_metadata_rows() {
        assert!(is_metadata_field("Patient Name"));
        assert!(is_metadata_field("Age"));
        assert!(!is_metadata_field("Ferritin"));
    }

    #[test]
    fn numeric_with_unit_matches_common_forms() {
        assert!(NUMERIC_WITH_UNIT.is_match("8.2 g/dL"));
        assert!(NUMERIC_WITH_UNIT.is_match("847 ng/mL"));
        assert!(NUMERIC_WITH_UNIT.is_match("18.2 x10^9/L"));
    }

    #[test]
    fn status_token_matches_high_low() {
        assert!(STATUS_TOKEN.is_match("185 H"));
        assert!(STATUS_TOKEN.is_match("Low"));
        assert!(!STATUS_TOKEN.is_match("Normal range"));
    }
}
