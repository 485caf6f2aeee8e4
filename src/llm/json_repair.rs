//! Permissive JSON extraction from LLM text output.
//!
//! Implements the repair pipeline in order: strip markdown fences, trim
//! leading prose, extract the outer `{…}` (or the largest `{…}` element
//! of a returned list), and fall back to a best-effort bracket-balancing
//! repair. Total failure returns `{}` rather than propagating, since a
//! custom column's "couldn't parse the model's answer" is a per-entity
//! warning, not a task failure.
//!
//! CPU-bound, so call sites should run this via `tokio::task::spawn_blocking`
//! (see [`repair_json_blocking`]) to avoid stalling the async reactor.

use serde_json::Value;

/// Strip ```json ... ``` / ``` ... ``` fences, if present.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.trim_end_matches("```").trim().to_string();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.trim_end_matches("```").trim().to_string();
    }
    trimmed.to_string()
}

/// Find the first `{` and its matching `}` via brace-depth counting,
/// returning the substring between them inclusive.
fn extract_outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// When the model answered with a JSON array of candidate objects,
/// return the largest `{…}` element by serialised length.
fn largest_object_in_array(value: &Value) -> Option<Value> {
    value
        .as_array()?
        .iter()
        .filter(|v| v.is_object())
        .max_by_key(|v| v.to_string().len())
        .cloned()
}

/// Extract a JSON object from arbitrary LLM text. Never fails; returns
/// `Value::Object(empty)` when nothing usable can be recovered.
pub fn repair_json(raw: &str) -> Value {
    let cleaned = strip_fences(raw);

    if let Ok(parsed) = serde_json::from_str::<Value>(&cleaned) {
        if let Some(obj) = largest_object_in_array(&parsed) {
            return obj;
        }
        if parsed.is_object() {
            return parsed;
        }
    }

    if let Some(candidate) = extract_outer_object(&cleaned) {
        if let Ok(parsed) = serde_json::from_str::<Value>(candidate) {
            return parsed;
        }
        if let Some(repaired) = balance_and_parse(candidate) {
            return repaired;
        }
    }

    serde_json::Value::Object(serde_json::Map::new())
}

/// Last-resort repair: trim trailing commas and close any unbalanced
/// braces/brackets/quotes before trying to parse again.
fn balance_and_parse(candidate: &str) -> Option<Value> {
    let mut repaired = candidate.trim().trim_end_matches(',').to_string();

    let opens = repaired.matches('{').count();
    let closes = repaired.matches('}').count();
    if opens > closes {
        repaired.push_str(&"}".repeat(opens - closes));
    }
    let bracket_opens = repaired.matches('[').count();
    let bracket_closes = repaired.matches(']').count();
    if bracket_opens > bracket_closes {
        repaired.push_str(&"]".repeat(bracket_opens - bracket_closes));
    }

    serde_json::from_str(&repaired).ok()
}

/// Offload [`repair_json`] to the blocking thread pool, matching the
/// crate's CPU-bound offload policy for JSON repair/large-response
/// parsing.
pub async fn repair_json_blocking(raw: String) -> Value {
    tokio::task::spawn_blocking(move || repair_json(&raw))
        .await
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}
