//! Lightweight content scans applied to step output.
//!
//! All scans are best-effort keyword/pattern checks. They feed the envelope's
//! risk block; they never fail a step.

use crate::governance::patterns;

/// Keywords that make a critic's output worth a human fact check.
pub const FACT_CHECK_KEYWORDS: &[&str] = &[
    "fact-check",
    "fact check",
    "unverified",
    "citation needed",
    "inaccurate",
    "misleading",
    "false claim",
    "disputed",
    "fabricated",
    "cannot be verified",
];

/// Hedging phrases that raise the hallucination estimate.
const HEDGES: &[&str] = &[
    "i think",
    "i believe",
    "probably",
    "possibly",
    "might be",
    "may be",
    "not sure",
    "unclear",
    "reportedly",
    "allegedly",
    "it is said",
];

const LICENSE_MARKERS: &[&str] = &[
    "all rights reserved",
    "proprietary",
    "copyrighted",
    "gpl",
    "do not distribute",
];

const BASE_HALLUCINATION: f64 = 0.2;
const HEDGE_PENALTY: f64 = 0.1;
const MAX_HEDGE_PENALTY: f64 = 0.5;
const UNCITED_PENALTY: f64 = 0.2;
const MAX_CLAIMS: usize = 20;

/// Kinds of personal data present in `text`. Values are not returned.
pub fn detect_pii(text: &str) -> Vec<String> {
    let mut kinds = Vec::new();
    // An unavailable pattern is reported as a finding so the output gets reviewed.
    match patterns::ssn() {
        Ok(re) if re.is_match(text) => kinds.push("ssn".to_string()),
        Ok(_) => {}
        Err(_) => kinds.push("ssn_scan_unavailable".to_string()),
    }
    match patterns::email() {
        Ok(re) if re.is_match(text) => kinds.push("email".to_string()),
        Ok(_) => {}
        Err(_) => kinds.push("email_scan_unavailable".to_string()),
    }
    kinds
}

/// URLs cited in `text`, deduplicated in order of appearance, with trailing
/// sentence punctuation removed.
pub fn extract_citations(text: &str) -> Vec<String> {
    let Ok(re) = patterns::url() else {
        return Vec::new();
    };
    let mut citations: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !citations.iter().any(|c| c == url) {
            citations.push(url.to_string());
        }
    }
    citations
}

/// `fact_check:<keyword>` flags for every keyword present.
pub fn fact_check_flags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    FACT_CHECK_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| format!("fact_check:{kw}"))
        .collect()
}

pub fn licensing_flags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    LICENSE_MARKERS
        .iter()
        .filter(|m| lower.contains(*m))
        .map(|m| m.to_string())
        .collect()
}

/// Estimate 0..=1: a base rate, plus a penalty per hedging phrase (capped),
/// plus a penalty when nothing is cited. Empty output scores 1.0.
pub fn hallucination_risk(text: &str, citations: &[String]) -> f64 {
    if text.trim().is_empty() {
        return 1.0;
    }
    let lower = text.to_lowercase();
    let hedges = HEDGES.iter().filter(|h| lower.contains(*h)).count() as f64;
    let mut risk = BASE_HALLUCINATION + (hedges * HEDGE_PENALTY).min(MAX_HEDGE_PENALTY);
    if citations.is_empty() {
        risk += UNCITED_PENALTY;
    }
    risk.clamp(0.0, 1.0)
}

/// Sentences and bullet lines of `text`, trimmed, at most twenty.
pub fn extract_claims(text: &str) -> Vec<String> {
    text.lines()
        .flat_map(|line| line.split_inclusive(['.', '!', '?']))
        .map(|s| s.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .take(MAX_CLAIMS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_pii_kinds_only() {
        let kinds = detect_pii("SSN 123-45-6789, mail bob@example.com");
        assert_eq!(kinds, vec!["ssn", "email"]);
        assert!(detect_pii("nothing personal here").is_empty());
    }

    #[test]
    fn test_citations_dedup_and_trim() {
        let text = "See https://a.example/x. Also https://a.example/x, and (https://b.example).";
        assert_eq!(
            extract_citations(text),
            vec!["https://a.example/x", "https://b.example"]
        );
    }

    #[test]
    fn test_fact_check_flags() {
        let flags = fact_check_flags("This figure is UNVERIFIED and possibly misleading.");
        assert_eq!(flags, vec!["fact_check:unverified", "fact_check:misleading"]);
    }

    #[test]
    fn test_hallucination_risk_bounds() {
        let cited = vec!["https://x.example".to_string()];
        assert!((hallucination_risk("Plain statement.", &cited) - 0.2).abs() < 1e-9);
        assert!((hallucination_risk("Plain statement.", &[]) - 0.4).abs() < 1e-9);
        let hedgy = "I think it is probably true, possibly, but not sure; reportedly unclear, allegedly.";
        assert!((hallucination_risk(hedgy, &[]) - 0.9).abs() < 1e-9);
        assert_eq!(hallucination_risk("   ", &cited), 1.0);
    }

    #[test]
    fn test_extract_claims_splits_sentences_and_bullets() {
        let claims = extract_claims("- First point. Second point!\n* Third\n\n---");
        assert_eq!(claims, vec!["First point.", "Second point!", "Third"]);
    }
}
