//! Two-pass text extraction from a lab report PDF: a *lean* structural pass
//! (table-ish, via `lopdf`'s page-content access) and a *full* per-page text
//! pass (via `pdf-extract`), deduplicated line-wise.

use common::error::AppError;
use lopdf::Document;

pub struct ExtractedText {
    /// Denser, table-biased extraction.
    pub lean: String,
    /// Full per-page text, newline-joined.
    pub full: String,
}

/// Extracts lean + full text from raw PDF bytes. Offloaded to a blocking
/// thread since both `pdf-extract` and `lopdf` are synchronous CPU-bound
/// parsers.
pub async fn extract_pdf_text(pdf_bytes: Vec<u8>) -> Result<ExtractedText, AppError> {
    tokio::task::spawn_blocking(move || extract_pdf_text_blocking(&pdf_bytes))
        .await
        .map_err(|err| AppError::Internal(format!("lab PDF extraction task panicked: {err}")))?
}

fn extract_pdf_text_blocking(pdf_bytes: &[u8]) -> Result<ExtractedText, AppError> {
    let full = pdf_extract::extract_text_from_mem(pdf_bytes)
        .map_err(|err| AppError::InputInvalid(format!("could not read PDF text layer: {err}")))?;

    let document = Document::load_mem(pdf_bytes)
        .map_err(|err| AppError::InputInvalid(format!("could not parse PDF structure: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    let mut lean_lines = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        if let Ok(content) = document.extract_text(&[page_number]) {
            lean_lines.push(content);
        }
    }
    let lean = dedup_lines(&lean_lines.join("\n"));

    Ok(ExtractedText {
        lean,
        full: full.trim().to_string(),
    })
}

/// Extracts lean + full text directly from plain text input (already-OCR'd
/// or pasted lab text); both passes see the same input in this case.
pub fn extract_plain_text(text: &str) -> ExtractedText {
    ExtractedText {
        lean: dedup_lines(text),
        full: text.trim().to_string(),
    }
}

fn dedup_lines(text: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_lines_removes_repeated_headers() {
        let input = "Page header\nHGB 13.2 g/dL\nPage header\nWBC 6.1 x10^9/L";
        let deduped = dedup_lines(input);
        assert_eq!(deduped.matches("Page header").count(), 1);
        assert!(deduped.contains("HGB 13.2 g/dL"));
    }

    #[test]
    fn extract_plain_text_preserves_full_text() {
        let extracted = extract_plain_text("HGB: 13.2 g/dL\n\nWBC: 6.1 x10^9/L");
        assert!(extracted.full.contains("WBC"));
    }
}
