//! JSON-path resolver: looks the target key up directly in `inputData`
//! parsed as JSON.

use crate::heuristics::{detect_format, DetectedFormat};
use crate::resolvers::default_resolver::{bool_from_str, list_value, number_from_str};
use crate::resolvers::registry::{FieldResolver, ResolverContext, ResolverOutcome};
use crate::types::ValidationType;
use async_trait::async_trait;
use std::collections::VecDeque;

pub struct JsonPathResolver;

#[async_trait]
impl FieldResolver for JsonPathResolver {
    fn name(&self) -> &str {
        "json-path"
    }

    fn supports(&self, ctx: &ResolverContext<'_>) -> bool {
        detect_format(ctx.input_data) == DetectedFormat::Json
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome {
        let parsed = ctx.shared.parsed_json(ctx.input_data).await;
        let root = match parsed.as_ref() {
            Ok(v) => v,
            Err(_) => return ResolverOutcome::NotFound,
        };

        // Verbatim/dotted-path lookup first: it's the cheap, unambiguous
        // case (and the only way to reach array indices or keys that
        // themselves contain dots).
        if let Some(value) = navigate(root, &ctx.step.target_key) {
            if !value.is_null() {
                return ResolverOutcome::Resolved {
                    value: coerce(value, ctx.step.validation_type),
                    confidence: 0.92,
                    diagnostics: Vec::new(),
                };
            }
        }

        match breadth_first_find(root, &ctx.step.target_key) {
            Some(value) if !value.is_null() => ResolverOutcome::Resolved {
                value: coerce(value, ctx.step.validation_type),
                confidence: 0.92,
                diagnostics: Vec::new(),
            },
            _ => ResolverOutcome::NotFound,
        }
    }
}

/// JSON values reached by key lookup arrive in whatever shape the source
/// document used them in (a schema asking for `number` may find `"3"`).
/// Coerces to the step's declared type; types with no meaningful coercion
/// (strings, emails, dates, ...) pass through unchanged.
fn coerce(value: &serde_json::Value, validation_type: ValidationType) -> serde_json::Value {
    match validation_type {
        ValidationType::Number => match value {
            serde_json::Value::Number(_) => value.clone(),
            serde_json::Value::String(s) => number_from_str(s).unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        },
        ValidationType::Boolean => match value {
            serde_json::Value::Bool(_) => value.clone(),
            serde_json::Value::String(s) => {
                bool_from_str(s).map(serde_json::Value::Bool).unwrap_or_else(|| value.clone())
            }
            _ => value.clone(),
        },
        ValidationType::StringArray => match value {
            serde_json::Value::Array(_) => value.clone(),
            serde_json::Value::String(s) => list_value(s, false),
            _ => value.clone(),
        },
        ValidationType::NumberArray => match value {
            serde_json::Value::Array(_) => value.clone(),
            serde_json::Value::String(s) => list_value(s, true),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Tries the target key verbatim (covers keys that themselves contain
/// dots), then falls back to treating dots as path separators.
fn navigate<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if let serde_json::Value::Object(map) = root {
        if let Some(v) = map.get(path) {
            return Some(v);
        }
    }

    let mut current = root;
    for part in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(part)?,
            serde_json::Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Splits a key into lowercase word tokens on any run of non-alphanumeric
/// characters and on camelCase boundaries.
fn tokenize(key: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.push(c.to_ascii_lowercase());
            prev_lower = c.is_lowercase() || c.is_numeric();
        } else {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// The four comparison forms a key is reduced to before matching:
/// `normalized` (separators collapsed to `_`), `collapsed` (separators
/// dropped entirely), `joined` (camelCase), `underscored` (snake_case).
fn key_variants(key: &str) -> [String; 4] {
    let words = tokenize(key);
    let normalized = words.join("_");
    let collapsed = words.concat();
    let joined = words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i == 0 {
                w.clone()
            } else {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<String>();
    let underscored = words.join("_");
    [normalized, collapsed, joined, underscored]
}

fn keys_match(target: &str, candidate: &str) -> bool {
    let target_variants = key_variants(target);
    let candidate_variants = key_variants(candidate);
    target_variants
        .iter()
        .any(|t| candidate_variants.iter().any(|c| c == t))
}

/// Breadth-first search of the parsed value for an object key matching
/// `target` under any of its normalized-key variants.
fn breadth_first_find<'a>(root: &'a serde_json::Value, target: &str) -> Option<&'a serde_json::Value> {
    let mut queue: VecDeque<&serde_json::Value> = VecDeque::new();
    queue.push_back(root);

    while let Some(node) = queue.pop_front() {
        match node {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    if keys_match(target, key) {
                        return Some(value);
                    }
                }
                for value in map.values() {
                    queue.push_back(value);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    queue.push_back(item);
                }
            }
            _ => {}
        }
    }
    None
}
