//! Citation normalization: turns free-text guideline mentions
//! extracted from generated text into verifiable, de-duplicated links.
//! Anything that cannot be resolved to a syntactically valid absolute
//! http(s) URL is dropped rather than surfaced half-formed.

pub mod aliases;

use common::clinical::{Citation, GuidelineChunk, RawCitation};
use tracing::debug;

use aliases::{canonicalize_organization, landing_page_for};

fn is_valid_absolute_http_url(candidate: &str) -> bool {
    url::Url::parse(candidate).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
}

/// Resolves one raw citation's URL in tiered order: an
/// already-present URL is validated as-is; failing that, the `source_url`
/// of a retrieved chunk from the same organization; failing that, a
/// canonical landing page keyed by organization.
fn resolve_url(organization: &str, raw: &RawCitation, retrieved_chunks: &[GuidelineChunk]) -> Option<String> {
    if let Some(url) = &raw.url {
        if is_valid_absolute_http_url(url) {
            return Some(url.clone());
        }
    }

    let from_chunk = retrieved_chunks
        .iter()
        .find(|chunk| chunk.organization.eq_ignore_ascii_case(organization))
        .and_then(|chunk| chunk.source_url.clone())
        .filter(|url| is_valid_absolute_http_url(url));
    if from_chunk.is_some() {
        return from_chunk;
    }

    landing_page_for(organization).map(str::to_string)
}

/// Identifies the organization a raw citation refers to: the explicit
/// `organization` field if present, otherwise a scan of the citation text
/// against the alias table.
fn identify_organization(raw: &RawCitation) -> Option<String> {
    if let Some(org) = &raw.organization {
        return Some(canonicalize_organization(org));
    }
    aliases::find_mention(&raw.text)
}

/// Normalizes raw citations extracted from generated text against the
/// chunks retrieved for this turn. Drops unresolvable citations and
/// de-duplicates survivors by URL, preserving first-occurrence order.
pub fn normalize(raw_citations: Vec<RawCitation>, retrieved_chunks: &[GuidelineChunk]) -> Vec<Citation> {
    let mut seen_urls = std::collections::HashSet::new();
    let mut out = Vec::new();

    for raw in raw_citations {
        let Some(organization) = identify_organization(&raw) else {
            debug!(text = %raw.text, "citation dropped: no identifiable organization");
            continue;
        };

        let Some(url) = resolve_url(&organization, &raw, retrieved_chunks) else {
            debug!(text = %raw.text, organization, "citation dropped: no verifiable URL");
            continue;
        };

        if !seen_urls.insert(url.clone()) {
            continue;
        }

        out.push(Citation {
            organization,
            text: raw.text,
            url,
            doc_id: raw.doc_id,
        });
    }

    out
}

/// `has_guidelines ⇔ citations ≠ ∅`.
pub fn has_guidelines(citations: &[Citation]) -> bool {
    !citations.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(organization: &str, source_url: Option<&str>) -> GuidelineChunk {
        GuidelineChunk {
            doc_id: "doc-1".to_string(),
            title: "Sample Guideline".to_string(),
            organization: organization.to_string(),
            year: Some(2022),
            topic: "sepsis".to_string(),
            categories: vec![],
            license: None,
            source_url: source_url.map(str::to_string),
            chunk_text: "excerpt".to_string(),
            chunk_index: 0,
        }
    }

    #[test]
    fn citation_with_valid_url_passes_through() {
        let raw = vec![RawCitation {
            organization: Some("CDC".to_string()),
            text: "CDC sepsis guideline".to_string(),
            url: Some("https://www.cdc.gov/sepsis/guidance.html".to_string()),
            doc_id: None,
        }];
        let result = normalize(raw, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].url, "https://www.cdc.gov/sepsis/guidance.html");
    }

    #[test]
    fn citation_without_url_resolves_from_retrieved_chunk() {
        let raw = vec![RawCitation {
            organization: Some("World Health Organization".to_string()),
            text: "(WHO, 2021)".to_string(),
            url: None,
            doc_id: None,
        }];
        let chunks = vec![chunk("WHO", Some("https://who.int/sepsis"))];
        let result = normalize(raw, &chunks);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].organization, "WHO");
        assert_eq!(result[0].url, "https://who.int/sepsis");
    }

    #[test]
    fn citation_without_url_or_chunk_falls_back_to_landing_page() {
        let raw = vec![RawCitation {
            organization: Some("NICE".to_string()),
            text: "(NICE)".to_string(),
            url: None,
            doc_id: None,
        }];
        let result = normalize(raw, &[]);
        assert_eq!(result.len(), 1);
        assert!(result[0].url.starts_with("https://"));
    }

    #[test]
    fn unresolvable_organization_is_dropped() {
        let raw = vec![RawCitation {
            organization: None,
            text: "(Martian Medical Society, 2099)".to_string(),
            url: None,
            doc_id: None,
        }];
        let result = normalize(raw, &[]);
        assert!(result.is_empty());
        assert!(!has_guidelines(&result));
    }

    #[test]
    fn duplicate_urls_are_deduplicated_keeping_first() {
        let raw = vec![
            RawCitation {
                organization: Some("CDC".to_string()),
                text: "first mention".to_string(),
                url: Some("https://www.cdc.gov/sepsis".to_string()),
                doc_id: None,
            },
            RawCitation {
                organization: Some("CDC".to_string()),
                text: "second mention".to_string(),
                url: Some("https://www.cdc.gov/sepsis".to_string()),
                doc_id: None,
            },
        ];
        let result = normalize(raw, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "first mention");
    }

    #[test]
    fn non_http_scheme_url_is_not_trusted_as_is() {
        let raw = vec![RawCitation {
            organization: Some("CDC".to_string()),
            text: "CDC reference".to_string(),
            url: Some("ftp://www.cdc.gov/guideline".to_string()),
            doc_id: None,
        }];
        let result = normalize(raw, &[]);
        assert_eq!(result.len(), 1);
        assert!(result[0].url.starts_with("https://"));
    }

    #[test]
    fn organization_mentioned_only_in_text_is_found_via_alias_scan() {
        let raw = vec![RawCitation {
            organization: None,
            text: "per American Thoracic Society / IDSA joint statement".to_string(),
            url: None,
            doc_id: None,
        }];
        let result = normalize(raw, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].organization, "ATS/IDSA");
    }
}
