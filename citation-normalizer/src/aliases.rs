//! Curated organization alias table and canonical landing pages.
//! Deliberately small and explicit rather than exhaustive — new
//! organizations are added here as the guideline corpus grows.

use once_cell::sync::Lazy;

/// `(alias, canonical name)`. Aliases are matched case-insensitively.
/// Ordered so that more specific multi-word aliases are tried before
/// generic substrings that could shadow them (e.g. "idsa" alone vs.
/// "ats/idsa").
static ALIASES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("american thoracic society / idsa", "ATS/IDSA"),
        ("american thoracic society/idsa", "ATS/IDSA"),
        ("ats/idsa", "ATS/IDSA"),
        ("american thoracic society", "ATS/IDSA"),
        ("infectious diseases society of america", "ATS/IDSA"),
        ("american academy of dermatology", "AAD"),
        ("aad", "AAD"),
        ("centers for disease control and prevention", "CDC"),
        ("centers for disease control", "CDC"),
        ("cdc", "CDC"),
        ("world health organization", "WHO"),
        ("who", "WHO"),
        ("national institute for health and care excellence", "NICE"),
        ("nice", "NICE"),
        ("us preventive services task force", "USPSTF"),
        ("u.s. preventive services task force", "USPSTF"),
        ("uspstf", "USPSTF"),
        ("pubmed central", "PMC"),
        ("pmc", "PMC"),
        ("national comprehensive cancer network", "NCCN"),
        ("nccn", "NCCN"),
        ("american college of cardiology", "ACC/AHA"),
        ("american heart association", "ACC/AHA"),
        ("acc/aha", "ACC/AHA"),
    ]
});

/// `(canonical name, landing page)`.
static LANDING_PAGES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("ATS/IDSA", "https://www.thoracic.org/statements/"),
        ("AAD", "https://www.aad.org/member/clinical-quality/guidelines"),
        ("CDC", "https://www.cdc.gov/"),
        ("WHO", "https://www.who.int/publications/guidelines"),
        ("NICE", "https://www.nice.org.uk/guidance"),
        ("USPSTF", "https://www.uspreventiveservicestaskforce.org/uspstf/"),
        ("PMC", "https://www.ncbi.nlm.nih.gov/pmc/"),
        ("NCCN", "https://www.nccn.org/guidelines/category_1"),
        ("ACC/AHA", "https://www.acc.org/guidelines"),
    ]
});

/// Canonicalizes an organization name the caller already believes it
/// knows (e.g. from a structured `organization` field): alias lookup
/// falls back to the input unchanged (trimmed) if no alias matches, so a
/// genuinely novel organization name is preserved rather than discarded.
pub fn canonicalize_organization(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| name.trim().to_string())
}

/// Scans free text for the longest matching alias, returning the
/// canonical organization name if one is found.
pub fn find_mention(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    ALIASES
        .iter()
        .filter(|(alias, _)| lowered.contains(alias))
        .max_by_key(|(alias, _)| alias.len())
        .map(|(_, canonical)| (*canonical).to_string())
}

/// The canonical landing page for an already-identified organization, if
/// one is curated.
pub fn landing_page_for(organization: &str) -> Option<&'static str> {
    LANDING_PAGES
        .iter()
        .find(|(org, _)| org.eq_ignore_ascii_case(organization))
        .map(|(_, url)| *url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_known_alias_case_insensitively() {
        assert_eq!(canonicalize_organization("world health organization"), "WHO");
        assert_eq!(canonicalize_organization("Who"), "WHO");
    }

    #[test]
    fn unknown_organization_passes_through_trimmed() {
        assert_eq!(canonicalize_organization("  Regional Tumor Board  "), "Regional Tumor Board");
    }

    #[test]
    fn find_mention_prefers_longest_match() {
        assert_eq!(find_mention("ATS/IDSA joint statement on CAP"), Some("ATS/IDSA".to_string()));
    }

    #[test]
    fn find_mention_returns_none_for_unrecognized_text() {
        assert_eq!(find_mention("Martian Medical Society"), None);
    }

    #[test]
    fn landing_page_lookup_is_case_insensitive() {
        assert!(landing_page_for("cdc").is_some());
    }
}
