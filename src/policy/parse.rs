//! Turning reasoning-service text into a [`PolicyDecision`].

use tracing::warn;

use crate::extract::{first_json_object, number_field};
use crate::types::PolicyDecision;

/// Parse a policy answer.
///
/// Takes the first JSON object in `text`, requires numeric
/// `admission_threshold`, `ttl_seconds` and `eviction_priority`, and clamps
/// them into range. Anything else yields `None`.
pub fn parse_policy_response(text: &str) -> Option<PolicyDecision> {
    let Some(map) = first_json_object(text) else {
        warn!(response = %preview(text), "no JSON object in reasoning response");
        return None;
    };

    let fields = (
        number_field(&map, "admission_threshold"),
        number_field(&map, "ttl_seconds"),
        number_field(&map, "eviction_priority"),
    );
    match fields {
        (Some(admission), Some(ttl), Some(eviction)) => {
            Some(PolicyDecision::clamped(admission, ttl, eviction))
        }
        _ => {
            warn!(response = %preview(text), "missing or non-numeric policy fields");
            None
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
