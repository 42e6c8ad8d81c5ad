//! Image triage (external collaborator): an optional zero-shot modality
//! classifier that seeds the specialist's
//! prompt but never gates or blocks the call. `DISABLE_MEDSIGLIP` (mapped
//! onto `AppConfig::image_triage.enabled`) turns this off entirely, in
//! which case every image is triaged as `uncertain`.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct TriageResult {
    pub modality: String,
    pub confidence: f32,
    pub labels: Vec<String>,
}

impl TriageResult {
    fn uncertain() -> Self {
        Self {
            modality: "uncertain".to_string(),
            confidence: 0.0,
            labels: Vec::new(),
        }
    }

    /// The compact one-line summary folded into `PromptMaterial::image_context`.
    pub fn to_prompt_summary(&self) -> String {
        if self.labels.is_empty() {
            format!("triage: modality={} confidence={:.2}", self.modality, self.confidence)
        } else {
            format!(
                "triage: modality={} confidence={:.2} labels=[{}]",
                self.modality,
                self.confidence,
                self.labels.join(", ")
            )
        }
    }
}

#[async_trait]
pub trait ImageTriage: Send + Sync {
    async fn triage(&self, image_bytes: &[u8]) -> TriageResult;
}

/// The default implementation when no triage model is configured, or when
/// `image_triage.enabled` is false. Always reports `uncertain` rather than
/// guessing — the specialist is still free to reason from the raw image.
pub struct UnconfiguredImageTriage;

#[async_trait]
impl ImageTriage for UnconfiguredImageTriage {
    async fn triage(&self, _image_bytes: &[u8]) -> TriageResult {
        TriageResult::uncertain()
    }
}
