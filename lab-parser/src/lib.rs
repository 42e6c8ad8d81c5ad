//! Deterministic lab report extraction: no LLM in the loop. Runs three
//! ordered candidate parsers over extracted PDF/text input and accepts the
//! first one whose output clears the scoring bar, falling back to signaling
//! that the input could not be recognized as a lab report rather than
//! guessing.

pub mod extract;
pub mod lexicon;
pub mod parsers;

use common::clinical::LabValue;
use common::error::AppError;
use parsers::{accept_candidate, FlatFullParser, LabRowParser, ScoredRow, TableFastParser, TableFullParser};

/// Which candidate path produced the accepted extraction, or that none did.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionPath {
    TableFast,
    TableFull,
    FlatFull,
}

#[derive(Debug, Clone)]
pub struct LabExtraction {
    pub labs: Vec<LabValue>,
    pub abnormal_count: usize,
    pub path: ExtractionPath,
}

/// Runs the three candidates in order (table-fast, table-full, flat-full)
/// against both the lean and full extracted text, accepting the first
/// candidate that clears the acceptance bar. `table-fast` gets first look
/// at `lean` since it's the cheapest and most precise when the input is
/// genuinely tabular; later candidates widen the search to `full`.
pub fn extract_labs_from_text(extracted: &extract::ExtractedText) -> Result<LabExtraction, AppError> {
    let candidates: [(ExtractionPath, &dyn LabRowParser, &str); 5] = [
        (ExtractionPath::TableFast, &TableFastParser, extracted.lean.as_str()),
        (ExtractionPath::TableFull, &TableFullParser, extracted.lean.as_str()),
        (ExtractionPath::TableFast, &TableFastParser, extracted.full.as_str()),
        (ExtractionPath::TableFull, &TableFullParser, extracted.full.as_str()),
        (ExtractionPath::FlatFull, &FlatFullParser, extracted.full.as_str()),
    ];

    for (path, parser, text) in candidates {
        let rows = parser.parse(text);
        if accept_candidate(&rows) {
            return Ok(finalize(path, rows));
        }
    }

    Err(AppError::ParseFailure(
        "input does not resemble a recognizable lab report".to_string(),
    ))
}

/// Extracts lab values from raw PDF bytes.
pub async fn extract_labs(pdf_bytes: Vec<u8>) -> Result<LabExtraction, AppError> {
    let extracted = extract::extract_pdf_text(pdf_bytes).await?;
    extract_labs_from_text(&extracted)
}

/// Extracts lab values from already-plain text (pasted or OCR'd).
pub fn extract_labs_from_plain_text(text: &str) -> Result<LabExtraction, AppError> {
    let extracted = extract::extract_plain_text(text);
    extract_labs_from_text(&extracted)
}

fn finalize(path: ExtractionPath, rows: Vec<ScoredRow>) -> LabExtraction {
    let abnormal_count = rows
        .iter()
        .filter(|r| r.lab.status != common::clinical::LabStatus::Normal)
        .count();
    LabExtraction {
        labs: rows.into_iter().map(|r| r.lab).collect(),
        abnormal_count,
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_table_fast_from_pipe_delimited_text() {
        let text = "Hemoglobin | 13.2 g/dL | 12.0-16.0 | Normal\nWBC | 11.8 x10^9/L | 4.0-10.0 | H\nPlatelet | 250 x10^9/L | 150-400 | Normal";
        let result = extract_labs_from_plain_text(text).expect("should extract");
        assert_eq!(result.path, ExtractionPath::TableFast);
        assert_eq!(result.labs.len(), 3);
        assert_eq!(result.abnormal_count, 1);
    }

    #[test]
    fn extracts_flat_full_from_colon_delimited_text() {
        let text = "Ferritin: 847 ng/mL (30-400) H\nTSH: 2.1 mIU/L (0.4-4.0)\nGlucose: 95 mg/dL (70-100)";
        let result = extract_labs_from_plain_text(text).expect("should extract");
        assert_eq!(result.labs.len(), 3);
        assert_eq!(result.abnormal_count, 1);
    }

    #[test]
    fn unrecognizable_input_is_a_parse_failure() {
        let text = "This is a letter about scheduling a follow-up appointment next week.";
        let result = extract_labs_from_plain_text(text);
        assert!(matches!(result, Err(AppError::ParseFailure(_))));
    }
}
