//! The heuristic Architect: builds a `SearchPlan` from pure pattern-based
//! inference, no model call involved.

use crate::architect::{Architect, ArchitectContext, ArchitectOutcome};
use crate::error::Result;
use crate::heuristics::{
    detect_format, detect_system_context, detect_validation_type, estimate_complexity,
    estimate_token_cost,
};
use crate::types::{
    ParseRequest, PlanId, PlanMetadata, PlanOrigin, PlanStrategy, SchemaDescriptor, SearchPlan,
    SearchStep,
};
use async_trait::async_trait;

/// `clamp(0.68 + 0.01 * fieldCount, 0, 0.92)` then floored at `0.65`.
fn heuristic_confidence(field_count: usize) -> f64 {
    let raw = 0.68 + 0.01 * field_count as f64;
    raw.min(0.92).max(0.65)
}

fn describe(key: &str, descriptor: &SchemaDescriptor) -> String {
    let hint = descriptor.as_hint_str();
    if hint.is_empty() {
        format!("the {} field", key.replace('_', " "))
    } else {
        format!("the {} field ({})", key.replace('_', " "), hint)
    }
}

fn search_instruction(key: &str, descriptor: &SchemaDescriptor, context: Option<&str>) -> String {
    let base = format!(
        "Locate the value for '{}' in the input, matching the expected {} shape.",
        key,
        descriptor.as_hint_str().trim().to_string().as_str(),
    );
    match context {
        Some(label) => format!("{} Consider this a {} document.", base, label),
        None => base,
    }
}

/// Builds a `SearchPlan` purely from the request's schema, instructions,
/// and input text — no LLM involvement.
pub fn build_heuristic_plan(request: &ParseRequest) -> SearchPlan {
    let format = detect_format(&request.input_data);
    let field_count = request.output_schema.len();
    let complexity = estimate_complexity(field_count, request.input_data.len());
    let estimated_tokens = estimate_token_cost(request.input_data.len(), field_count);

    let schema_keys: Vec<String> = request.output_schema.keys().cloned().collect();
    let descriptor_hints: Vec<String> =
        request.output_schema.values().map(|d| d.as_hint_str()).collect();
    let context = detect_system_context(
        &schema_keys,
        &descriptor_hints,
        request.instructions.as_deref(),
        field_count,
    );
    let context_label = context.as_ref().map(|c| c.label.clone());

    let steps: Vec<SearchStep> = request
        .output_schema
        .iter()
        .map(|(key, descriptor)| SearchStep {
            target_key: key.clone(),
            description: describe(key, descriptor),
            search_instruction: search_instruction(key, descriptor, context_label.as_deref()),
            validation_type: detect_validation_type(key, descriptor),
            is_required: !descriptor.is_optional(),
        })
        .collect();

    let confidence_threshold = request
        .options
        .as_ref()
        .and_then(|o| o.confidence_threshold)
        .unwrap_or(0.6);

    SearchPlan {
        id: PlanId::new(),
        version: 1,
        steps,
        strategy: PlanStrategy::Sequential,
        confidence_threshold,
        metadata: PlanMetadata {
            detected_format: format.as_str().to_string(),
            complexity,
            estimated_tokens,
            origin: PlanOrigin::Heuristic,
            planner_confidence: Some(heuristic_confidence(field_count)),
            context,
        },
    }
}

pub struct HeuristicArchitect;

#[async_trait]
impl Architect for HeuristicArchitect {
    async fn build_plan(&self, request: &ParseRequest, _ctx: &ArchitectContext) -> Result<ArchitectOutcome> {
        Ok(ArchitectOutcome::plain(build_heuristic_plan(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParseOptions;

    fn schema(pairs: &[(&str, &str)]) -> indexmap::IndexMap<String, SchemaDescriptor> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SchemaDescriptor::Hint(v.to_string())))
            .collect()
    }

    #[test]
    fn builds_one_step_per_schema_key_in_order() {
        let request = ParseRequest {
            input_data: "Email: a@b.com\nPhone: 555".to_string(),
            output_schema: schema(&[("email", "email"), ("phone", "phone")]),
            instructions: None,
            options: None,
        };
        let plan = build_heuristic_plan(&request);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].target_key, "email");
        assert_eq!(plan.steps[1].target_key, "phone");
        assert_eq!(plan.metadata.origin, PlanOrigin::Heuristic);
    }

    #[test]
    fn confidence_floor_holds_for_small_schemas() {
        let request = ParseRequest {
            input_data: "x".to_string(),
            output_schema: schema(&[("a", "string")]),
            instructions: None,
            options: None,
        };
        let plan = build_heuristic_plan(&request);
        assert!(plan.metadata.planner_confidence.unwrap() >= 0.65);
    }

    #[test]
    fn confidence_caps_for_large_schemas() {
        let pairs: Vec<(String, String)> =
            (0..50).map(|i| (format!("field_{i}"), "string".to_string())).collect();
        let schema: indexmap::IndexMap<String, SchemaDescriptor> = pairs
            .into_iter()
            .map(|(k, v)| (k, SchemaDescriptor::Hint(v)))
            .collect();
        let request = ParseRequest {
            input_data: "x".to_string(),
            output_schema: schema,
            instructions: None,
            options: None,
        };
        let plan = build_heuristic_plan(&request);
        assert!(plan.metadata.planner_confidence.unwrap() <= 0.92);
    }

    #[test]
    fn confidence_threshold_respects_options() {
        let request = ParseRequest {
            input_data: "x".to_string(),
            output_schema: schema(&[("a", "string")]),
            instructions: None,
            options: Some(ParseOptions {
                confidence_threshold: Some(0.8),
                ..Default::default()
            }),
        };
        let plan = build_heuristic_plan(&request);
        assert_eq!(plan.confidence_threshold, 0.8);
    }
}
