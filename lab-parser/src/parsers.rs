//! The three ordered candidate row parsers and the scoring rule that
//! decides whether a candidate's output is trustworthy enough to accept.

use common::clinical::{LabStatus, LabValue, ReferenceRange};

use crate::lexicon::{is_known_analyte, is_metadata_field, NUMERIC_WITH_UNIT, REFERENCE_RANGE, STATUS_TOKEN, TABLE_FAST_ROW};

/// Minimum rows a candidate must produce to be considered at all.
const MIN_ACCEPTED_ROWS: usize = 2;
/// Minimum average row score (out of 4 signals) to accept a candidate.
const ACCEPT_SCORE_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub lab: LabValue,
    pub score: u8,
}

pub trait LabRowParser {
    fn name(&self) -> &'static str;
    fn parse(&self, text: &str) -> Vec<ScoredRow>;
}

fn score_row(name: &str, value_text: &str, reference_present: bool, status_hint: Option<&str>) -> (u8, Option<ReferenceRange>, LabStatus, f64, String) {
    let mut score = 0u8;

    if is_known_analyte(name) {
        score += 1;
    }

    let Some(caps) = NUMERIC_WITH_UNIT.captures(value_text) else {
        return (score, None, LabStatus::Normal, 0.0, String::new());
    };
    score += 1;
    let value: f64 = caps[1].parse().unwrap_or(0.0);
    let unit = caps[2].to_string();

    let reference_range = if reference_present {
        REFERENCE_RANGE.captures(value_text).and_then(|r| {
            let low: f64 = r[1].parse().ok()?;
            let high: f64 = r[2].parse().ok()?;
            score += 1;
            Some(ReferenceRange { low, high })
        })
    } else {
        None
    };

    let status = if let Some(hint) = status_hint {
        score += 1;
        match hint.to_ascii_uppercase().as_str() {
            "H" | "HIGH" | "CRITICAL" => LabStatus::High,
            "L" | "LOW" => LabStatus::Low,
            _ => LabStatus::Normal,
        }
    } else if let Some(range) = &reference_range {
        range.classify(value)
    } else {
        LabStatus::Normal
    };

    (score, reference_range, status, value, unit)
}

fn status_hint(text: &str) -> Option<String> {
    STATUS_TOKEN.captures(text).map(|c| c[1].to_string())
}

/// Pipe/tab-delimited rows: `test | result | reference | interpretation`.
pub struct TableFastParser;

impl LabRowParser for TableFastParser {
    fn name(&self) -> &'static str {
        "table-fast"
    }

    fn parse(&self, text: &str) -> Vec<ScoredRow> {
        let mut rows = Vec::new();
        for line in text.lines() {
            let Some(caps) = TABLE_FAST_ROW.captures(line) else {
                continue;
            };
            let test_name = caps[1].trim().to_string();
            if test_name.is_empty() || is_metadata_field(&test_name) {
                continue;
            }
            let result = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let reference = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            let interpretation = caps.get(4).map(|m| m.as_str()).unwrap_or("");

            let combined = format!("{result} {reference}");
            let hint = status_hint(interpretation).or_else(|| status_hint(result));
            let (score, reference_range, status, value, unit) =
                score_row(&test_name, &combined, !reference.trim().is_empty(), hint.as_deref());

            if score == 0 {
                continue;
            }

            rows.push(ScoredRow {
                lab: LabValue {
                    test_name,
                    value,
                    unit,
                    reference_range,
                    status,
                },
                score,
            });
        }
        rows
    }
}

/// Column-inferred tables: consecutive whitespace-separated columns where
/// the layout isn't pipe-delimited but still reads as a table (multiple
/// spaces between fields).
pub struct TableFullParser;

impl LabRowParser for TableFullParser {
    fn name(&self) -> &'static str {
        "table-full"
    }

    fn parse(&self, text: &str) -> Vec<ScoredRow> {
        let mut rows = Vec::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split("  ").map(str::trim).filter(|s| !s.is_empty()).collect();
            if fields.len() < 2 {
                continue;
            }
            let test_name = fields[0].to_string();
            if is_metadata_field(&test_name) {
                continue;
            }
            let rest = fields[1..].join(" ");
            let hint = status_hint(&rest);
            let reference_present = REFERENCE_RANGE.is_match(&rest);
            let (score, reference_range, status, value, unit) =
                score_row(&test_name, &rest, reference_present, hint.as_deref());

            if score == 0 {
                continue;
            }

            rows.push(ScoredRow {
                lab: LabValue {
                    test_name,
                    value,
                    unit,
                    reference_range,
                    status,
                },
                score,
            });
        }
        rows
    }
}

/// Space/colon-delimited flat lines: `NAME VALUE UNIT REF STATUS`, e.g.
/// `Ferritin: 847 ng/mL (30-400) H`.
pub struct FlatFullParser;

impl LabRowParser for FlatFullParser {
    fn name(&self) -> &'static str {
        "flat-full"
    }

    fn parse(&self, text: &str) -> Vec<ScoredRow> {
        let mut rows = Vec::new();
        for line in text.lines() {
            let Some((name_part, rest)) = split_name_and_rest(line) else {
                continue;
            };
            let test_name = name_part.trim().to_string();
            if test_name.is_empty() || is_metadata_field(&test_name) {
                continue;
            }
            let hint = status_hint(rest);
            let reference_present = REFERENCE_RANGE.is_match(rest);
            let (score, reference_range, status, value, unit) =
                score_row(&test_name, rest, reference_present, hint.as_deref());

            if score == 0 {
                continue;
            }

            rows.push(ScoredRow {
                lab: LabValue {
                    test_name,
                    value,
                    unit,
                    reference_range,
                    status,
                },
                score,
            });
        }
        rows
    }
}

fn split_name_and_rest(line: &str) -> Option<(&str, &str)> {
    if let Some(idx) = line.find(':') {
        return Some((&line[..idx], &line[idx + 1..]));
    }
    // Fall back to splitting on the first run of digits, treating
    // everything before it as the name.
    let idx = line.find(|c: char| c.is_ascii_digit())?;
    if idx == 0 {
        return None;
    }
    Some((&line[..idx], &line[idx..]))
}

/// Runs a candidate parser and decides whether its output clears the
/// acceptance bar (>= 2 rows, average score above threshold).
pub fn accept_candidate(rows: &[ScoredRow]) -> bool {
    if rows.len() < MIN_ACCEPTED_ROWS {
        return false;
    }
    let total: u32 = rows.iter().map(|r| u32::from(r.score)).sum();
    let average = f64::from(total) / rows.len() as f64;
    average > ACCEPT_SCORE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_fast_parses_pipe_delimited_rows() {
        let text = "Hemoglobin | 13.2 g/dL | 12.0-16.0 | Normal\nWBC | 11.8 x10^9/L | 4.0-10.0 | H";
        let rows = TableFastParser.parse(text);
        assert_eq!(rows.len(), 2);
        assert!(accept_candidate(&rows));
    }

    #[test]
    fn flat_full_parses_colon_delimited_rows() {
        let text = "Ferritin: 847 ng/mL (30-400) H\nTSH: 2.1 mIU/L (0.4-4.0)";
        let rows = FlatFullParser.parse(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lab.status, LabStatus::High);
    }

    #[test]
    fn metadata_rows_are_rejected() {
        let text = "Patient Name: Jane Doe\nAge: 45";
        let rows = FlatFullParser.parse(text);
        assert!(rows.is_empty());
    }

    #[test]
    fn low_signal_rows_are_not_accepted() {
        let text = "Comment line with no structure\nAnother unrelated line";
        let rows = FlatFullParser.parse(text);
        assert!(!accept_candidate(&rows));
    }
}
