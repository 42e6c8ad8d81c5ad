//! The clinical data model shared by every component: lab values, the
//! ordered differential, guideline chunks, and citations. Types here are
//! pure data — no component owns them exclusively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum differential length.
pub const MAX_DIFFERENTIAL_LEN: usize = 4;

/// Maximum number of recent `key_findings` retained after compaction.
pub const MAX_KEY_FINDINGS: usize = 20;

/// Full in-progress rounds kept before older ones are summarized.
pub const FULL_ROUNDS_KEPT: usize = 2;

/// Patient history is truncated to this many bytes on intake.
pub const PATIENT_HISTORY_MAX_BYTES: usize = 4 * 1024;

/// `probability` is either a coarse bucket or a numeric 0-100 estimate. The
/// wire shape is one of `"high"` / `"medium"` / `"low"` or a bare integer,
/// never a wrapped object — so this carries its own `Serialize`/
/// `Deserialize` rather than deriving the externally-tagged default, which
/// would require `{"numeric": 80}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probability {
    High,
    Medium,
    Low,
    /// Numeric estimate in [0, 100]. Construct via `Probability::numeric`
    /// to keep the range invariant enforced at one call site.
    Numeric(u8),
}

impl Probability {
    pub fn numeric(value: u8) -> Self {
        Self::Numeric(value.min(100))
    }

    /// Coarse ordering used to enforce "at most one high-probability
    /// diagnosis unless explicitly evidenced".
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High) || matches!(self, Self::Numeric(v) if *v >= 80)
    }
}

impl Serialize for Probability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::High => serializer.serialize_str("high"),
            Self::Medium => serializer.serialize_str("medium"),
            Self::Low => serializer.serialize_str("low"),
            Self::Numeric(v) => serializer.serialize_u8(*v),
        }
    }
}

impl<'de> Deserialize<'de> for Probability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bucket(String),
            Numeric(u8),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Bucket(s) => match s.to_lowercase().as_str() {
                "high" => Ok(Self::High),
                "medium" => Ok(Self::Medium),
                "low" => Ok(Self::Low),
                other => Err(serde::de::Error::custom(format!("unknown probability bucket: {other}"))),
            },
            Wire::Numeric(v) => Ok(Self::numeric(v)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Normal,
    High,
    Low,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: f64,
    pub high: f64,
}

impl ReferenceRange {
    pub fn classify(&self, value: f64) -> LabStatus {
        if value > self.high {
            LabStatus::High
        } else if value < self.low {
            LabStatus::Low
        } else {
            LabStatus::Normal
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabValue {
    pub test_name: String,
    pub value: f64,
    pub unit: String,
    pub reference_range: Option<ReferenceRange>,
    pub status: LabStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Diagnosis {
    pub name: String,
    pub probability: Option<Probability>,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub against_evidence: Vec<String>,
    #[serde(default)]
    pub suggested_tests: Vec<String>,
}

impl Default for Probability {
    fn default() -> Self {
        Self::Low
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuledOut {
    pub diagnosis: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebateRound {
    pub user_challenge: String,
    pub ai_response: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Net change in the differential this round produced, as a compact
    /// human-readable note (e.g. "added: viral pericarditis (low)").
    pub differential_delta: String,
}

/// Per-session clinical state. Bounded in size; the session store compacts
/// this after every turn (see `session-store`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClinicalState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub patient_history: String,
    pub lab_values: Vec<LabValue>,
    pub differential: Vec<Diagnosis>,
    pub key_findings: Vec<String>,
    pub ruled_out: Vec<RuledOut>,
    pub debate_round: u64,
    /// Compacted specialist interpretation of any uploaded image.
    pub image_context: Option<String>,
    /// Only the last `FULL_ROUNDS_KEPT` rounds are kept in full; earlier
    /// rounds are folded into `episode_summaries`.
    pub rounds: Vec<DebateRound>,
    pub episode_summaries: Vec<String>,
}

impl ClinicalState {
    pub fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            updated_at: now,
            patient_history: String::new(),
            lab_values: Vec::new(),
            differential: Vec::new(),
            key_findings: Vec::new(),
            ruled_out: Vec::new(),
            debate_round: 0,
            image_context: None,
            rounds: Vec::new(),
            episode_summaries: Vec::new(),
        }
    }

    /// Approximate serialized size in bytes, used by the session store's
    /// compaction policy to decide when to summarize older rounds.
    pub fn serialized_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    /// Set `patient_history`, truncating to the intake cap.
    pub fn set_patient_history(&mut self, text: &str) {
        if text.len() <= PATIENT_HISTORY_MAX_BYTES {
            self.patient_history = text.to_string();
            return;
        }
        let mut cut = PATIENT_HISTORY_MAX_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.patient_history = text[..cut].to_string();
    }

    /// A compact structured-text summary (<= ~2KB) of this state for use in
    /// the orchestrator's formulation prompt.
    pub fn to_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("history: {}\n", truncate_chars(&self.patient_history, 600)));
        if !self.lab_values.is_empty() {
            out.push_str("labs: ");
            for lab in &self.lab_values {
                out.push_str(&format!("{}={}{} ", lab.test_name, lab.value, lab.unit));
            }
            out.push('\n');
        }
        if !self.differential.is_empty() {
            out.push_str("differential: ");
            for dx in &self.differential {
                out.push_str(&format!("{}; ", dx.name));
            }
            out.push('\n');
        }
        if !self.ruled_out.is_empty() {
            out.push_str("ruled_out: ");
            for r in &self.ruled_out {
                out.push_str(&format!("{}; ", r.diagnosis));
            }
            out.push('\n');
        }
        if let Some(img) = &self.image_context {
            out.push_str(&format!("image: {}\n", truncate_chars(img, 300)));
        }
        truncate_chars(&out, 2048)
    }

    /// Enforces the differential-length, ruled-out-disjointness, and
    /// at-most-one-high invariants. Truncates/demotes overflow rather than
    /// erroring, since the orchestrator owns producing a compliant
    /// differential and this is a last-line defense. "Unless explicitly
    /// evidenced" isn't mechanically checkable, so this keeps only the
    /// first `high` diagnosis the orchestrator already ranked highest and
    /// demotes the rest to `medium` rather than guessing at evidence
    /// strength.
    pub fn enforce_invariants(&mut self) {
        self.differential.truncate(MAX_DIFFERENTIAL_LEN);
        let ruled_out_names: std::collections::HashSet<String> = self
            .ruled_out
            .iter()
            .map(|r| r.diagnosis.to_lowercase())
            .collect();
        self.differential
            .retain(|d| !ruled_out_names.contains(&d.name.to_lowercase()));

        let mut seen_high = false;
        for dx in &mut self.differential {
            let is_high = dx.probability.is_some_and(|p| p.is_high());
            if is_high {
                if seen_high {
                    dx.probability = Some(Probability::Medium);
                } else {
                    seen_high = true;
                }
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuidelineChunk {
    pub doc_id: String,
    pub title: String,
    pub organization: String,
    pub year: Option<u16>,
    pub topic: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub license: Option<String>,
    pub source_url: Option<String>,
    pub chunk_text: String,
    pub chunk_index: u32,
}

/// A citation as extracted from raw generated text, before normalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawCitation {
    pub organization: Option<String>,
    pub text: String,
    pub url: Option<String>,
    pub doc_id: Option<String>,
}

/// A normalized, verifiable citation. Only citations with a valid absolute
/// http(s) URL survive normalization (see `citation-normalizer`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub organization: String,
    pub text: String,
    pub url: String,
    pub doc_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_history_truncates_at_intake() {
        let mut state = ClinicalState::new("s1".to_string());
        let long = "a".repeat(PATIENT_HISTORY_MAX_BYTES + 500);
        state.set_patient_history(&long);
        assert_eq!(state.patient_history.len(), PATIENT_HISTORY_MAX_BYTES);
    }

    #[test]
    fn enforce_invariants_caps_differential_length() {
        let mut state = ClinicalState::new("s1".to_string());
        for i in 0..6 {
            state.differential.push(Diagnosis {
                name: format!("dx{i}"),
                ..Default::default()
            });
        }
        state.enforce_invariants();
        assert!(state.differential.len() <= MAX_DIFFERENTIAL_LEN);
    }

    #[test]
    fn enforce_invariants_removes_ruled_out_overlap() {
        let mut state = ClinicalState::new("s1".to_string());
        state.differential.push(Diagnosis {
            name: "Lyme disease".to_string(),
            ..Default::default()
        });
        state.ruled_out.push(RuledOut {
            diagnosis: "lyme disease".to_string(),
            reason: "negative serology".to_string(),
        });
        state.enforce_invariants();
        assert!(state.differential.is_empty());
    }

    #[test]
    fn probability_numeric_clamps_to_100() {
        assert!(matches!(Probability::numeric(250), Probability::Numeric(100)));
    }

    #[test]
    fn probability_deserializes_from_bucket_string_or_bare_number() {
        let high: Probability = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(high, Probability::High);
        let numeric: Probability = serde_json::from_str("72").unwrap();
        assert_eq!(numeric, Probability::Numeric(72));
    }

    #[test]
    fn probability_serializes_back_to_bare_scalar() {
        assert_eq!(serde_json::to_string(&Probability::Medium).unwrap(), "\"medium\"");
        assert_eq!(serde_json::to_string(&Probability::numeric(55)).unwrap(), "55");
    }

    #[test]
    fn enforce_invariants_demotes_extra_high_diagnoses_to_medium() {
        let mut state = ClinicalState::new("s1".to_string());
        state.differential.push(Diagnosis {
            name: "melanoma".to_string(),
            probability: Some(Probability::High),
            ..Default::default()
        });
        state.differential.push(Diagnosis {
            name: "seborrheic keratosis".to_string(),
            probability: Some(Probability::High),
            ..Default::default()
        });
        state.enforce_invariants();
        assert_eq!(state.differential[0].probability, Some(Probability::High));
        assert_eq!(state.differential[1].probability, Some(Probability::Medium));
    }
}
