//! Section-scoring resolver: picks the best-matching headed section of
//! free text and extracts the field value from it.

use crate::heuristics::{detect_format, DetectedFormat, Section};
use crate::resolvers::default_resolver::extract_typed_value;
use crate::resolvers::registry::{FieldResolver, ResolverContext, ResolverOutcome};
use crate::types::ValidationType;
use async_trait::async_trait;

fn is_generic_type(vt: ValidationType) -> bool {
    matches!(
        vt,
        ValidationType::String
            | ValidationType::Name
            | ValidationType::Address
            | ValidationType::Object
            | ValidationType::Custom
    )
}

/// Bonus applied when a section contains a `label:` line whose label
/// mentions one of the field's tokens, on top of the heading score.
const LABELED_LINE_BONUS: f64 = 0.05;
const SCORE_THRESHOLD: f64 = 0.3;

pub struct SectionResolver;

#[async_trait]
impl FieldResolver for SectionResolver {
    fn name(&self) -> &str {
        "section"
    }

    fn supports(&self, ctx: &ResolverContext<'_>) -> bool {
        detect_format(ctx.input_data) != DetectedFormat::Json
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome {
        let sections = ctx.shared.sections(ctx.input_data).await;
        if sections.is_empty() {
            return ResolverOutcome::NotFound;
        }

        let tokens = field_tokens(&ctx.step.target_key, &ctx.step.description);
        if tokens.is_empty() {
            return ResolverOutcome::NotFound;
        }

        let best = best_section(&sections, &tokens);
        let (section, score) = match best {
            Some(found) if found.1 >= SCORE_THRESHOLD => found,
            _ => return ResolverOutcome::NotFound,
        };

        let section_text = section.lines.join("\n");
        let value = extract_typed_value(&section_text, ctx.step.validation_type, &tokens)
            .or_else(|| {
                if is_generic_type(ctx.step.validation_type) {
                    section
                        .lines
                        .iter()
                        .find(|l| !l.trim().is_empty())
                        .map(|l| serde_json::Value::String(l.trim().to_string()))
                } else {
                    None
                }
            });

        let base = (0.45 + 0.4 * score).clamp(0.0, 0.88);
        match value {
            Some(value) => ResolverOutcome::Resolved {
                value,
                confidence: base,
                diagnostics: Vec::new(),
            },
            // A section matched but held nothing extractable: not a hit,
            // but worth noting at half the section's confidence.
            None => ResolverOutcome::Failed {
                message: format!(
                    "section '{}' matched but produced no value (confidence {:.2})",
                    section.heading,
                    base / 2.0
                ),
            },
        }
    }
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

/// Scores a section against the field's tokens: an exact heading match is
/// 1.0, a substring match is 0.85, otherwise each shared token contributes
/// up to a combined 0.9. A labeled `key:` line inside the section adds a
/// small bonus on top.
fn score_section(section: &Section, tokens: &[String]) -> f64 {
    let heading_lower = section.heading.to_lowercase();
    let mut score = if tokens.iter().any(|t| heading_lower == *t) {
        1.0
    } else if tokens.iter().any(|t| heading_lower.contains(t.as_str())) {
        0.85
    } else {
        let matched = tokens.iter().filter(|t| heading_lower.contains(t.as_str())).count();
        if matched == 0 {
            0.0
        } else {
            (0.9 * matched as f64 / tokens.len() as f64).min(0.9)
        }
    };

    if has_labeled_line(section, tokens) {
        score += LABELED_LINE_BONUS;
    }
    score.min(1.0)
}

fn best_section<'a>(sections: &'a [Section], tokens: &[String]) -> Option<(&'a Section, f64)> {
    let mut best: Option<(&Section, f64)> = None;
    for section in sections {
        let score = score_section(section, tokens);
        if score <= 0.0 {
            continue;
        }
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((section, score));
        }
    }
    best
}

fn has_labeled_line(section: &Section, tokens: &[String]) -> bool {
    section.lines.iter().any(|line| {
        let idx = match line.find(':') {
            Some(i) => i,
            None => return false,
        };
        let label_lower = line[..idx].to_lowercase();
        tokens.iter().any(|t| label_lower.contains(t.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::registry::SharedParseState;
    use crate::types::{
        ParseOptions, PlanComplexity, PlanId, PlanMetadata, PlanOrigin, PlanStrategy, RequestId,
        SearchPlan, SearchStep, ValidationType,
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

    fn step(key: &str, description: &str) -> SearchStep {
        SearchStep {
            target_key: key.to_string(),
            description: description.to_string(),
            search_instruction: format!("find {}", key),
            validation_type: ValidationType::String,
            is_required: true,
        }
    }

    #[tokio::test]
    async fn finds_labeled_value_in_best_section() {
        let resolver = SectionResolver;
        let input = "CONTACT\nEmail: jane@example.com\nPhone: 555-0100\n\nSHIPPING\nAddress: 1 Main St";
        let schema = indexmap::IndexMap::new();
        let p = plan();
        let s = step("contact_email", "contact email address");
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: input,
            step: &s,
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
        let outcome = resolver.resolve(&ctx).await;
        match outcome {
            ResolverOutcome::Resolved { value, confidence, .. } => {
                assert_eq!(value, serde_json::json!("jane@example.com"));
                assert!(confidence > 0.7);
            }
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_matching_section_returns_not_found() {
        let resolver = SectionResolver;
        let input = "SHIPPING\nAddress: 1 Main St";
        let schema = indexmap::IndexMap::new();
        let p = plan();
        let s = step("invoice_total", "invoice total amount");
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: input,
            step: &s,
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
        assert!(matches!(resolver.resolve(&ctx).await, ResolverOutcome::NotFound));
    }

    #[tokio::test]
    async fn declines_json_input() {
        let resolver = SectionResolver;
        let schema = indexmap::IndexMap::new();
        let p = plan();
        let s = step("email", "email address");
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: r#"{"email": "a@b.com"}"#,
            step: &s,
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
        assert!(!resolver.supports(&ctx));
    }

    #[tokio::test]
    async fn matching_section_with_no_extractable_value_fails_as_diagnostic() {
        let resolver = SectionResolver;
        let input = "CONTACT\n(details withheld)";
        let schema = indexmap::IndexMap::new();
        let p = plan();
        let mut s = step("contact_notes", "contact notes");
        s.validation_type = ValidationType::Email;
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: input,
            step: &s,
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
        match resolver.resolve(&ctx).await {
            ResolverOutcome::Failed { message } => assert!(message.contains("CONTACT")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}
