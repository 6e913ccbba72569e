//! Regex/type default resolver: last-resort pattern matching keyed off the
//! step's `ValidationType`.

use crate::resolvers::registry::{FieldResolver, ResolverContext, ResolverOutcome};
use crate::types::ValidationType;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

pub struct DefaultResolver;

#[async_trait]
impl FieldResolver for DefaultResolver {
    fn name(&self) -> &str {
        "default-pattern"
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome {
        let input = ctx.input_data;
        let tokens = field_tokens(&ctx.step.target_key, &ctx.step.description);

        match extract_typed_value(input, ctx.step.validation_type, &tokens) {
            Some(value) => ResolverOutcome::Resolved {
                value,
                confidence: 0.72,
                diagnostics: Vec::new(),
            },
            None => ResolverOutcome::NotFound,
        }
    }
}

/// Type-directed pattern extraction shared with the section resolver, which
/// runs the same logic scoped to a single winning section's text.
pub(crate) fn extract_typed_value(
    input: &str,
    validation_type: ValidationType,
    tokens: &[String],
) -> Option<serde_json::Value> {
    match validation_type {
        ValidationType::Email => regex_first(input, email_regex()).map(str_value),
        ValidationType::Phone => regex_first(input, phone_regex()).map(str_value),
        ValidationType::Url => regex_first(input, url_regex()).map(str_value),
        ValidationType::IsoDate => regex_first(input, iso_date_regex()).map(str_value),
        ValidationType::Date => regex_first(input, iso_date_regex())
            .or_else(|| regex_first(input, date_regex()))
            .map(str_value),
        ValidationType::Currency => regex_first(input, currency_regex()).map(str_value),
        ValidationType::Percentage => regex_first(input, percentage_regex()).map(str_value),
        ValidationType::Number => labeled_number(input, tokens)
            .or_else(|| regex_first(input, number_regex()).map(str_value)),
        ValidationType::Boolean => boolean_match(input, tokens),
        ValidationType::StringArray => labeled_line(input, tokens).map(|v| list_value(&v, false)),
        ValidationType::NumberArray => labeled_line(input, tokens).map(|v| list_value(&v, true)),
        ValidationType::String
        | ValidationType::Name
        | ValidationType::Address
        | ValidationType::Object
        | ValidationType::Custom => labeled_line(input, tokens).map(str_value),
    }
}

fn str_value(s: String) -> serde_json::Value {
    serde_json::Value::String(s)
}

/// Splits a comma-separated string into a JSON array, parsing each part as
/// a number when `numeric` is set (falling back to a string for parts that
/// don't parse). Shared with the JSON-path resolver's type coercion.
pub(crate) fn list_value(s: &str, numeric: bool) -> serde_json::Value {
    let items: Vec<serde_json::Value> = s
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            if numeric {
                part.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(part.to_string()))
            } else {
                serde_json::Value::String(part.to_string())
            }
        })
        .collect();
    serde_json::Value::Array(items)
}

/// Parses a bare `true`/`yes`/`y`/`1` or `false`/`no`/`n`/`0` token
/// (case-insensitive). Shared with the JSON-path resolver's type coercion.
pub(crate) fn bool_from_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parses a string as a JSON number, stripping everything but digits,
/// `.`, and `-`. Shared with the JSON-path resolver's type coercion.
pub(crate) fn number_from_str(s: &str) -> Option<serde_json::Value> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
    cleaned
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
}

fn field_tokens(key: &str, description: &str) -> Vec<String> {
    let mut tokens: Vec<String> = key
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_lowercase())
        .collect();
    tokens.extend(
        description
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 3)
            .map(|s| s.to_lowercase()),
    );
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Scans every line for a `label: value` pair whose label contains one of
/// the field's tokens.
fn labeled_line(input: &str, tokens: &[String]) -> Option<String> {
    if tokens.is_empty() {
        return None;
    }
    for line in input.lines() {
        let idx = match line.find(':') {
            Some(i) => i,
            None => continue,
        };
        let (label, value) = (&line[..idx], &line[idx + 1..]);
        let label_lower = label.to_lowercase();
        let value = value.trim();
        if !value.is_empty() && tokens.iter().any(|t| label_lower.contains(t.as_str())) {
            return Some(value.to_string());
        }
    }
    None
}

fn labeled_number(input: &str, tokens: &[String]) -> Option<serde_json::Value> {
    let raw = labeled_line(input, tokens)?;
    number_from_str(&raw)
}

fn boolean_match(input: &str, tokens: &[String]) -> Option<serde_json::Value> {
    let raw = labeled_line(input, tokens)?;
    bool_from_str(&raw).map(serde_json::Value::Bool)
}

fn regex_first<'a>(input: &'a str, re: &Regex) -> Option<String> {
    re.find(input).map(|m| m.as_str().to_string())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").unwrap())
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\-.\s()]{7,}\d").unwrap())
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"]+"#).unwrap())
}

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?)?").unwrap()
    })
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap())
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[$€£]\s?\d[\d,]*(\.\d+)?").unwrap())
}

fn percentage_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(\.\d+)?\s?%").unwrap())
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(\.\d+)?").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::registry::SharedParseState;
    use crate::types::{
        ParseOptions, PlanComplexity, PlanId, PlanMetadata, PlanOrigin, PlanStrategy, RequestId,
        SearchPlan, SearchStep,
    };

    fn plan() -> SearchPlan {
        SearchPlan {
            id: PlanId::new(),
            version: 1,
            steps: Vec::new(),
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.5,
            metadata: PlanMetadata {
                detected_format: "text".to_string(),
                complexity: PlanComplexity::Low,
                estimated_tokens: 1,
                origin: PlanOrigin::Heuristic,
                planner_confidence: Some(0.7),
                context: None,
            },
        }
    }

    fn step(key: &str, description: &str, vt: ValidationType) -> SearchStep {
        SearchStep {
            target_key: key.to_string(),
            description: description.to_string(),
            search_instruction: format!("find {}", key),
            validation_type: vt,
            is_required: true,
        }
    }

    async fn resolve(input: &str, s: &SearchStep) -> ResolverOutcome {
        let resolver = DefaultResolver;
        let schema = indexmap::IndexMap::new();
        let p = plan();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: input,
            step: s,
            schema: &schema,
            instructions: None,
            plan: &p,
            options: &options,
            shared: &shared,
            llm_field_client: None,
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };
        resolver.resolve(&ctx).await
    }

    #[tokio::test]
    async fn matches_email_anywhere_in_text() {
        let s = step("email", "email", ValidationType::Email);
        let outcome = resolve("Reach me at jane@example.com anytime", &s).await;
        match outcome {
            ResolverOutcome::Resolved { value, .. } => assert_eq!(value, serde_json::json!("jane@example.com")),
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn matches_currency() {
        let s = step("invoice_total", "invoice total", ValidationType::Currency);
        let outcome = resolve("Total due: $1,204.50", &s).await;
        match outcome {
            ResolverOutcome::Resolved { value, .. } => assert_eq!(value, serde_json::json!("$1,204.50")),
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn matches_labeled_string_array() {
        let s = step("tag_list", "tag list", ValidationType::StringArray);
        let outcome = resolve("Tags: red, blue, green", &s).await;
        match outcome {
            ResolverOutcome::Resolved { value, .. } => {
                assert_eq!(value, serde_json::json!(["red", "blue", "green"]));
            }
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_match_is_not_found() {
        let s = step("patient_id", "patient id", ValidationType::String);
        let outcome = resolve("nothing relevant here", &s).await;
        assert!(matches!(outcome, ResolverOutcome::NotFound));
    }
}
