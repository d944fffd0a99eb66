//! Compiled-once regular expressions shared by policies, sanitization and the
//! plan heuristics.
//!
//! Accessors return `Result` so a bad pattern surfaces as a failed check
//! rather than a panic.

use std::sync::OnceLock;

use regex::Regex;

use crate::governance::error::{GovernanceError, PolicyResult};

type Cell = OnceLock<Result<Regex, regex::Error>>;

fn cached(cell: &'static Cell, pattern: &str) -> PolicyResult<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| GovernanceError::Pattern(e.to_string()))
}

macro_rules! pattern {
    ($(#[$meta:meta])* $name:ident, $re:expr) => {
        $(#[$meta])*
        pub fn $name() -> PolicyResult<&'static Regex> {
            static CELL: Cell = OnceLock::new();
            cached(&CELL, $re)
        }
    };
}

pattern!(
    /// US social security number shape, e.g. `123-45-6789`.
    ssn,
    r"\b\d{3}-\d{2}-\d{4}\b"
);

pattern!(email, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b");

pattern!(url, r#"https?://[^\s<>"')\]]+"#);

pattern!(
    /// A removal verb followed within two words by a safety mechanism.
    /// Underscores and camelCase count as word breaks, so identifiers such as
    /// `disable_safety` and `removeGuardrails` match too.
    safety_removal,
    r"(?i)(?:\b|_)(?:disabl|remov|bypass|circumvent|deactivat|strip)[a-z]*?[\W_]*(?:[a-z0-9]+[\W_]+){0,2}?(?:safety|guardrail|content[\W_]*filter|moderation)"
);

pattern!(
    /// A safety mechanism followed within two words by a removal verb or `off`.
    safety_removal_reversed,
    r"(?i)(?:\b|_)(?:safety|guardrail|content[\W_]*filter|moderation)[a-z]*?[\W_]*(?:[a-z0-9]+[\W_]+){0,2}?(?:disabl|remov|bypass|off(?:\b|_))"
);

pattern!(
    privilege_grant,
    r"(?i)\b(?:grant|give|escalat|elevat|assign|promot)\w*\W+(?:\w+\W+){0,3}(?:admin\w*|root|superuser|sudo|owner)\b"
);

pattern!(privilege_command, r"(?i)\bsudo\s+\S|\bchmod\s+(?:-R\s+)?777\b|\bsetuid\b");

pattern!(
    /// Script-like markup: script/iframe tags, inline handlers, `javascript:` URLs.
    script_injection,
    r#"(?i)<\s*/?\s*(?:script|iframe)\b|<[^>]*[\s/]on\w+\s*=|javascript\s*:"#
);

pattern!(
    script_block,
    r"(?is)<\s*(script|iframe)\b[^>]*>.*?<\s*/\s*(script|iframe)\s*>"
);

pattern!(script_tag, r"(?i)<\s*/?\s*(?:script|iframe)\b[^>]*>");

pattern!(html_tag, r"<[A-Za-z][^>]*>");

pattern!(
    event_handler_attr,
    r#"(?i)[\s/]+on\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#
);

pattern!(javascript_scheme, r"(?i)javascript\s*:");
