//! Strips executable markup from free-text proposal fields.
//!
//! Runs before a proposal is persisted or displayed, independently of the
//! pass/fail policies.

use crate::governance::patterns;
use crate::governance::policy::Proposal;

/// Return a copy of `proposal` with title, description and every string leaf
/// of the payload sanitized. Idempotent.
pub fn sanitize_proposal(proposal: &Proposal) -> Proposal {
    let mut clean = proposal.clone();
    clean.title = sanitize_text(&proposal.title);
    clean.description = sanitize_text(&proposal.description);
    sanitize_value(&mut clean.payload);
    clean
}

/// Remove script/iframe blocks and tags, event-handler attributes inside
/// tags, and `javascript:` schemes. If a pattern is unavailable, angle brackets are
/// escaped instead so nothing executable survives.
pub fn sanitize_text(input: &str) -> String {
    let (Ok(block), Ok(tag), Ok(any_tag), Ok(handler), Ok(scheme)) = (
        patterns::script_block(),
        patterns::script_tag(),
        patterns::html_tag(),
        patterns::event_handler_attr(),
        patterns::javascript_scheme(),
    ) else {
        return input.replace('<', "&lt;").replace('>', "&gt;");
    };

    let mut text = input.to_string();
    // Removing one construct can expose another (`<scr<script>ipt>`), so
    // repeat until stable.
    loop {
        let next = block.replace_all(&text, "");
        let next = tag.replace_all(&next, "");
        let next = any_tag.replace_all(&next, |caps: &regex::Captures<'_>| {
            handler.replace_all(&caps[0], "").into_owned()
        });
        let next = scheme.replace_all(&next, "").into_owned();
        if next == text {
            return text;
        }
        text = next;
    }
}

fn sanitize_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = sanitize_text(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(sanitize_value),
        _ => {}
    }
}
