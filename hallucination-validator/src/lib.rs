//! Hallucination validation: detects numeric lab-style values in
//! generated text that are not traceable to user-supplied inputs, and
//! drives the one-shot corrective retry loop around any generative step
//! that consumes user labs.

pub mod extraction;
pub mod units;

use common::clinical::{ClinicalState, LabValue};
pub use extraction::{extract_numeric_with_unit, NumericWithUnit};

const FLOAT_TOLERANCE: f64 = 1e-6;

/// One value from user-supplied data that generated text is allowed to
/// restate.
#[derive(Debug, Clone)]
pub struct AllowedValue {
    pub value: f64,
    pub unit: String,
    pub lab_name: Option<String>,
}

/// Result of validating a piece of generated text against the allowed
/// values for a session.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub offending: Vec<NumericWithUnit>,
    pub suggested_correction_prompt: Option<String>,
}

/// Builds the set of values generated text may restate, from a session's
/// structured lab values and a plain scan of the patient history prose
/// (which may itself mention values in free text).
pub fn build_allowed_values(state: &ClinicalState) -> Vec<AllowedValue> {
    let mut allowed: Vec<AllowedValue> = state
        .lab_values
        .iter()
        .map(|lab: &LabValue| AllowedValue {
            value: lab.value,
            unit: lab.unit.clone(),
            lab_name: Some(lab.test_name.clone()),
        })
        .collect();

    for found in extract_numeric_with_unit(&state.patient_history) {
        allowed.push(AllowedValue {
            value: found.value,
            unit: found.unit,
            lab_name: None,
        });
    }

    allowed
}

/// The set of lab names generated text may reference, used for
/// proximity-based allow matching.
pub fn allowed_lab_names(state: &ClinicalState) -> Vec<String> {
    state.lab_values.iter().map(|lab| lab.test_name.clone()).collect()
}

fn is_allowed(found: &NumericWithUnit, allowed_values: &[AllowedValue], allowed_lab_names: &[String]) -> bool {
    let name_or_proximity_ok = extraction::context_matches_known_lab_name(&found.context, allowed_lab_names)
        || allowed_values.iter().any(|allowed| {
            allowed
                .lab_name
                .as_ref()
                .is_some_and(|name| found.context.to_lowercase().contains(&name.to_lowercase()))
        });

    allowed_values.iter().any(|allowed| {
        units::units_equivalent(&allowed.unit, &found.unit)
            && (allowed.value - found.value).abs() < FLOAT_TOLERANCE
            && (name_or_proximity_ok || allowed.lab_name.is_none())
    })
}

/// Validates `generated_text` against the allowed values and lab names
/// for a session. Every numeric-with-unit token in the text must be
/// traceable to a user-supplied value (by lab-name-or-proximity match
/// plus numeric equality); anything else is an offending hallucination.
pub fn validate(generated_text: &str, allowed_values: &[AllowedValue], allowed_lab_names: &[String]) -> ValidationResult {
    let found = extract_numeric_with_unit(generated_text);
    let offending: Vec<NumericWithUnit> = found
        .into_iter()
        .filter(|candidate| !is_allowed(candidate, allowed_values, allowed_lab_names))
        .collect();

    if offending.is_empty() {
        return ValidationResult {
            ok: true,
            offending: vec![],
            suggested_correction_prompt: None,
        };
    }

    let prompt = build_correction_prompt(&offending);
    ValidationResult {
        ok: false,
        offending,
        suggested_correction_prompt: Some(prompt),
    }
}

/// Builds the corrective re-call prompt naming every offending value.
fn build_correction_prompt(offending: &[NumericWithUnit]) -> String {
    let values = offending
        .iter()
        .map(|v| format!("{} {}", v.value, v.unit))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Your previous response stated the following value(s) that do not appear in the \
         patient's provided data: {values}. Use only the lab values explicitly provided; \
         do not fabricate numeric values. Revise your response accordingly."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clinical::{LabStatus, ReferenceRange};

    fn sample_allowed() -> (Vec<AllowedValue>, Vec<String>) {
        let allowed_values = vec![AllowedValue {
            value: 8.2,
            unit: "g/dL".to_string(),
            lab_name: Some("hemoglobin".to_string()),
        }];
        let allowed_lab_names = vec!["hemoglobin".to_string()];
        (allowed_values, allowed_lab_names)
    }

    #[test]
    fn matching_value_with_known_lab_name_passes() {
        let (allowed_values, allowed_lab_names) = sample_allowed();
        let text = "The hemoglobin of 8.2 g/dL is consistent with anemia.";
        let result = validate(text, &allowed_values, &allowed_lab_names);
        assert!(result.ok);
        assert!(result.offending.is_empty());
    }

    #[test]
    fn fabricated_value_is_flagged_as_offending() {
        let (allowed_values, allowed_lab_names) = sample_allowed();
        let text = "The troponin of 4.7 ng/mL suggests myocardial injury.";
        let result = validate(text, &allowed_values, &allowed_lab_names);
        assert!(!result.ok);
        assert_eq!(result.offending.len(), 1);
        assert!(result.suggested_correction_prompt.unwrap().contains("4.7"));
    }

    #[test]
    fn unit_equivalent_variant_still_matches() {
        let (allowed_values, allowed_lab_names) = sample_allowed();
        let text = "Hemoglobin measured 8.2 g/dl.";
        let result = validate(text, &allowed_values, &allowed_lab_names);
        assert!(result.ok);
    }

    #[test]
    fn slightly_different_value_is_flagged() {
        let (allowed_values, allowed_lab_names) = sample_allowed();
        let text = "Hemoglobin was 9.1 g/dL.";
        let result = validate(text, &allowed_values, &allowed_lab_names);
        assert!(!result.ok);
    }

    #[test]
    fn build_allowed_values_includes_structured_labs_and_history_mentions() {
        let mut state = ClinicalState::new("s1".to_string());
        state.lab_values.push(LabValue {
            test_name: "glucose".to_string(),
            value: 110.0,
            unit: "mg/dL".to_string(),
            reference_range: Some(ReferenceRange { low: 70.0, high: 100.0 }),
            status: LabStatus::High,
        });
        state.set_patient_history("Patient reports a home reading of 130 mg/dL yesterday.");

        let allowed = build_allowed_values(&state);
        assert!(allowed.iter().any(|a| a.lab_name.as_deref() == Some("glucose")));
        assert!(allowed.iter().any(|a| a.lab_name.is_none() && (a.value - 130.0).abs() < 1e-6));
    }
}
