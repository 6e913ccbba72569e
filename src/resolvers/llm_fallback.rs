//! Lean LLM field-fallback resolver: the last resolver in the default
//! chain, gated by plan confidence and a per-parse token/invocation budget,
//! with cooldown-limited retries and shared-extraction bookkeeping so one
//! call can resolve more than the field that triggered it.
//!
//! The cooldown/backoff shape is adapted from "retry the same call" to
//! "don't re-issue the same call too soon, and remember what the last one
//! returned."

use crate::llm::{FieldResolveRequest, LeanLLMContext};
use crate::resolvers::registry::{FieldResolver, ResolverContext, ResolverOutcome};
use crate::types::{
    FallbackAction, LeanLLMFallbackUsageSummary, LeanLLMFieldUsage, LeanLLMRequestStrategy,
    ParseDiagnostic, Severity, Stage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Invoked,
    SharedExtraction,
}

#[derive(Debug, Clone)]
pub struct LlmFieldResolution {
    pub value: serde_json::Value,
    pub confidence: f64,
    pub tokens_used: u32,
    pub source: ResolutionSource,
}

/// Per-parse fallback bookkeeping: memoized resolutions, cooldown clock,
/// and the running usage log rendered into `LeanLLMFallbackUsageSummary`
/// at the end of the parse.
pub struct LlmFallbackState {
    pub resolved: HashMap<String, LlmFieldResolution>,
    last_attempt: Option<Instant>,
    invocations: u32,
    tokens: u32,
    fields_log: Vec<LeanLLMFieldUsage>,
    plan_confidence_gate: Option<f64>,
    max_invocations_per_parse: Option<u32>,
    max_tokens_per_parse: Option<u32>,
}

impl LlmFallbackState {
    pub fn new() -> Self {
        Self {
            resolved: HashMap::new(),
            last_attempt: None,
            invocations: 0,
            tokens: 0,
            fields_log: Vec::new(),
            plan_confidence_gate: None,
            max_invocations_per_parse: None,
            max_tokens_per_parse: None,
        }
    }

    fn note_limits(&mut self, config: &EffectiveLlmConfig) {
        self.plan_confidence_gate = Some(config.plan_confidence_gate);
        self.max_invocations_per_parse = config.max_invocations_per_parse;
        self.max_tokens_per_parse = config.max_tokens_per_parse;
    }

    fn record_reuse(&mut self, field: &str, confidence: f64) {
        self.fields_log.push(LeanLLMFieldUsage {
            field: field.to_string(),
            action: FallbackAction::Reused,
            resolved: Some(true),
            confidence: Some(confidence),
            tokens_used: None,
            reason: None,
            source_field: None,
            shared_keys: None,
            planner_confidence: None,
            gate: None,
            error: None,
            limit_type: None,
            limit: None,
            current_invocations: None,
            current_tokens: None,
        });
    }

    fn record_skip_plan_confidence(&mut self, field: &str, plan_confidence: f64, gate: f64) {
        self.fields_log.push(LeanLLMFieldUsage {
            field: field.to_string(),
            action: FallbackAction::Skipped,
            resolved: None,
            confidence: None,
            tokens_used: None,
            reason: Some("plan confidence below fallback gate".to_string()),
            source_field: None,
            shared_keys: None,
            planner_confidence: Some(plan_confidence),
            gate: Some(gate),
            error: None,
            limit_type: Some("plan-confidence".to_string()),
            limit: None,
            current_invocations: None,
            current_tokens: None,
        });
    }

    fn record_skip_limit(&mut self, field: &str, limit_type: &str, limit: u32, current: u32) {
        self.fields_log.push(LeanLLMFieldUsage {
            field: field.to_string(),
            action: FallbackAction::Skipped,
            resolved: None,
            confidence: None,
            tokens_used: None,
            reason: Some(format!("{} limit reached", limit_type)),
            source_field: None,
            shared_keys: None,
            planner_confidence: None,
            gate: None,
            error: None,
            limit_type: Some(limit_type.to_string()),
            limit: Some(limit),
            current_invocations: (limit_type == "invocations").then_some(current),
            current_tokens: (limit_type == "tokens").then_some(current),
        });
    }

    fn record_failure(&mut self, field: &str, message: &str) {
        self.fields_log.push(LeanLLMFieldUsage {
            field: field.to_string(),
            action: FallbackAction::Invoked,
            resolved: Some(false),
            confidence: None,
            tokens_used: None,
            reason: None,
            source_field: None,
            shared_keys: None,
            planner_confidence: None,
            gate: None,
            error: Some(message.to_string()),
            limit_type: None,
            limit: None,
            current_invocations: None,
            current_tokens: None,
        });
    }

    fn record_invocation(&mut self, primary_field: &str, pending_fields: &[String], tokens_used: u32) {
        let shared_keys: Vec<String> = pending_fields
            .iter()
            .filter(|f| f.as_str() != primary_field)
            .cloned()
            .collect();
        for field in pending_fields {
            let resolution = self.resolved.get(field);
            self.fields_log.push(LeanLLMFieldUsage {
                field: field.clone(),
                action: FallbackAction::Invoked,
                resolved: Some(resolution.is_some()),
                confidence: resolution.map(|r| r.confidence),
                tokens_used: Some(tokens_used),
                reason: None,
                source_field: (field.as_str() != primary_field).then(|| primary_field.to_string()),
                shared_keys: (field.as_str() == primary_field && !shared_keys.is_empty())
                    .then(|| shared_keys.clone()),
                planner_confidence: None,
                gate: None,
                error: None,
                limit_type: None,
                limit: None,
                current_invocations: None,
                current_tokens: None,
            });
        }
    }

    /// Renders the accumulated log into the public usage summary.
    pub fn snapshot_usage(&self) -> LeanLLMFallbackUsageSummary {
        let mut summary = LeanLLMFallbackUsageSummary::empty();
        summary.total_invocations = self.invocations;
        summary.total_tokens = self.tokens;
        summary.plan_confidence_gate = self.plan_confidence_gate;
        summary.max_invocations_per_parse = self.max_invocations_per_parse;
        summary.max_tokens_per_parse = self.max_tokens_per_parse;

        for entry in &self.fields_log {
            match entry.action {
                FallbackAction::Invoked => {
                    if entry.resolved == Some(true) {
                        summary.resolved_fields += 1;
                    }
                    if entry.source_field.is_some() {
                        summary.shared_extractions += 1;
                    }
                }
                FallbackAction::Reused => summary.reused_resolutions += 1,
                FallbackAction::Skipped => match entry.limit_type.as_deref() {
                    Some("plan-confidence") => summary.skipped_by_plan_confidence += 1,
                    _ => summary.skipped_by_limits += 1,
                },
            }
        }
        summary.fields = self.fields_log.clone();
        summary
    }
}

impl Default for LlmFallbackState {
    fn default() -> Self {
        Self::new()
    }
}

struct EffectiveLlmConfig {
    allow_optional_fields: bool,
    request_strategy: LeanLLMRequestStrategy,
    cooldown_ms: u64,
    confidence_floor: f64,
    plan_confidence_gate: f64,
    max_invocations_per_parse: Option<u32>,
    max_tokens_per_parse: Option<u32>,
    max_input_characters: usize,
}

/// Marker appended to input truncated for the lean LLM call, so the model
/// (and anyone reading a transcript) knows the tail was cut.
const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Defaults chosen for this crate (no upstream defaults exist to inherit):
/// a short cooldown, a conservative confidence floor, a low plan-confidence
/// gate (see DESIGN.md for why "low" rather than "high" was chosen), and a
/// modest per-parse invocation/token ceiling.
fn effective_config(ctx: &ResolverContext<'_>) -> EffectiveLlmConfig {
    let runtime = ctx.options.lean_llm.clone().unwrap_or_default();
    EffectiveLlmConfig {
        allow_optional_fields: runtime.allow_optional_fields.unwrap_or(false),
        request_strategy: runtime.request_strategy.unwrap_or_default(),
        cooldown_ms: runtime.cooldown_ms.unwrap_or(1500),
        confidence_floor: runtime.confidence_floor.unwrap_or(0.55),
        plan_confidence_gate: runtime.plan_confidence_gate.unwrap_or(0.4),
        max_invocations_per_parse: Some(runtime.max_invocations_per_parse.unwrap_or(8)),
        max_tokens_per_parse: Some(runtime.max_tokens_per_parse.unwrap_or(4000)),
        max_input_characters: runtime.max_input_characters.unwrap_or(8000),
    }
}

/// Trims `input` to `max_chars`, appending a truncation marker so the
/// effective length still fits the budget.
fn trim_for_llm(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let mut truncated: String = input.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

pub struct LlmFallbackResolver;

#[async_trait]
impl FieldResolver for LlmFallbackResolver {
    fn name(&self) -> &str {
        "lean-llm-fallback"
    }

    fn supports(&self, ctx: &ResolverContext<'_>) -> bool {
        if ctx.llm_field_client.is_none() {
            return false;
        }
        ctx.step.is_required || effective_config(ctx).allow_optional_fields
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome {
        let client = match ctx.llm_field_client {
            Some(c) => c,
            None => return ResolverOutcome::NotFound,
        };
        let config = effective_config(ctx);
        let key = ctx.step.target_key.clone();

        {
            let mut llm = ctx.shared.llm.lock().await;
            llm.note_limits(&config);

            if let Some(existing) = llm.resolved.get(&key).cloned() {
                llm.record_reuse(&key, existing.confidence);
                return ResolverOutcome::Resolved {
                    value: existing.value,
                    confidence: existing.confidence,
                    diagnostics: Vec::new(),
                };
            }

            let plan_confidence = ctx
                .plan
                .metadata
                .planner_confidence
                .unwrap_or(ctx.plan.confidence_threshold);
            if plan_confidence >= config.plan_confidence_gate {
                llm.record_skip_plan_confidence(&key, plan_confidence, config.plan_confidence_gate);
                return ResolverOutcome::NotFound;
            }

            if let Some(max_inv) = config.max_invocations_per_parse {
                if llm.invocations >= max_inv {
                    llm.record_skip_limit(&key, "invocations", max_inv, llm.invocations);
                    return ResolverOutcome::NotFound;
                }
            }
            if let Some(max_tok) = config.max_tokens_per_parse {
                if llm.tokens >= max_tok {
                    llm.record_skip_limit(&key, "tokens", max_tok, llm.tokens);
                    return ResolverOutcome::NotFound;
                }
            }
            if let Some(last) = llm.last_attempt {
                if last.elapsed() < Duration::from_millis(config.cooldown_ms) {
                    llm.record_skip_limit(&key, "cooldown", 0, 0);
                    return ResolverOutcome::NotFound;
                }
            }

            llm.last_attempt = Some(Instant::now());
            llm.invocations += 1;
        }

        let pending_fields: Vec<String> = match config.request_strategy {
            LeanLLMRequestStrategy::SingleField => vec![key.clone()],
            LeanLLMRequestStrategy::MissingRequired => {
                let llm = ctx.shared.llm.lock().await;
                let mut fields: Vec<String> = ctx
                    .plan
                    .steps
                    .iter()
                    .filter(|s| s.is_required && !llm.resolved.contains_key(&s.target_key))
                    .map(|s| s.target_key.clone())
                    .collect();
                if !fields.contains(&key) {
                    fields.push(key.clone());
                }
                fields
            }
        };

        let request = FieldResolveRequest {
            input_data: trim_for_llm(ctx.input_data, config.max_input_characters),
            output_schema: ctx.schema.clone(),
            instructions: ctx.instructions.map(|s| s.to_string()),
            plan: ctx.plan.clone(),
            pending_fields: pending_fields.clone(),
            context: LeanLLMContext {
                profile: ctx.profile.map(|s| s.to_string()),
                request_id: Some(ctx.request_id),
                session_id: ctx.session_id,
            },
        };

        let response = client.resolve(request).await;

        let mut llm = ctx.shared.llm.lock().await;
        let response = match response {
            Ok(r) => r,
            Err(message) => {
                llm.record_failure(&key, &message);
                return ResolverOutcome::Failed { message };
            }
        };

        let tokens_used = response.usage.as_ref().and_then(|u| u.tokens_used).unwrap_or(0);
        llm.tokens += tokens_used;

        let mut diagnostics = Vec::new();
        if let Some(values) = &response.values {
            for (field_key, value) in values {
                let confidence = response
                    .confidences
                    .as_ref()
                    .and_then(|c| c.get(field_key))
                    .copied()
                    .or(response.confidence)
                    .unwrap_or(config.confidence_floor);
                if confidence < config.confidence_floor {
                    diagnostics.push(ParseDiagnostic::for_field(
                        field_key.clone(),
                        Stage::Fallback,
                        Severity::Warning,
                        format!(
                            "lean-llm fallback confidence {:.2} below floor {:.2}",
                            confidence, config.confidence_floor
                        ),
                    ));
                    continue;
                }
                let source = if field_key == &key {
                    ResolutionSource::Invoked
                } else {
                    ResolutionSource::SharedExtraction
                };
                llm.resolved.insert(
                    field_key.clone(),
                    LlmFieldResolution {
                        value: value.clone(),
                        confidence,
                        tokens_used,
                        source,
                    },
                );
            }
        }
        if let Some(shared_extractions) = &response.shared_extractions {
            for (field_key, value) in shared_extractions {
                llm.resolved.entry(field_key.clone()).or_insert_with(|| LlmFieldResolution {
                    value: value.clone(),
                    confidence: config.confidence_floor,
                    tokens_used: 0,
                    source: ResolutionSource::SharedExtraction,
                });
            }
        }

        llm.record_invocation(&key, &pending_fields, tokens_used);

        match llm.resolved.get(&key).cloned() {
            Some(resolution) => ResolverOutcome::Resolved {
                value: resolution.value,
                confidence: resolution.confidence,
                diagnostics,
            },
            None => {
                diagnostics.push(ParseDiagnostic::for_field(
                    key.clone(),
                    Stage::Fallback,
                    Severity::Warning,
                    "lean-llm fallback returned no value for this field",
                ));
                ResolverOutcome::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FieldResolveResponse, LeanLLMFieldClient, LeanLLMUsage};
    use crate::resolvers::registry::SharedParseState;
    use crate::types::{
        LeanLLMRuntimeOptions, ParseOptions, PlanComplexity, PlanId, PlanMetadata, PlanOrigin,
        PlanStrategy, RequestId, SearchPlan, SearchStep, ValidationType,
    };
    use async_trait::async_trait;

    struct StubClient {
        values: HashMap<String, serde_json::Value>,
        tokens: u32,
    }

    #[async_trait]
    impl LeanLLMFieldClient for StubClient {
        async fn resolve(&self, _request: FieldResolveRequest) -> Result<FieldResolveResponse, String> {
            Ok(FieldResolveResponse {
                values: Some(self.values.clone()),
                confidences: None,
                confidence: Some(0.8),
                diagnostics: None,
                field_diagnostics: None,
                usage: Some(LeanLLMUsage {
                    tokens_used: Some(self.tokens),
                    latency_ms: Some(10),
                    model: Some("stub".to_string()),
                }),
                shared_extractions: None,
            })
        }
    }

    fn plan_with(required: &[&str]) -> SearchPlan {
        SearchPlan {
            id: PlanId::new(),
            version: 1,
            steps: required
                .iter()
                .map(|k| SearchStep {
                    target_key: k.to_string(),
                    description: k.to_string(),
                    search_instruction: format!("find {}", k),
                    validation_type: ValidationType::String,
                    is_required: true,
                })
                .collect(),
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.5,
            metadata: PlanMetadata {
                detected_format: "text".to_string(),
                complexity: PlanComplexity::Low,
                estimated_tokens: 1,
                origin: PlanOrigin::Heuristic,
                planner_confidence: Some(0.8),
                context: None,
            },
        }
    }

    #[tokio::test]
    async fn invokes_client_and_resolves_field() {
        let resolver = LlmFallbackResolver;
        let client = StubClient {
            values: HashMap::from([("email".to_string(), serde_json::json!("a@b.com"))]),
            tokens: 42,
        };
        let plan = plan_with(&["email"]);
        let step = plan.steps[0].clone();
        let schema = indexmap::IndexMap::new();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: "irrelevant",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: Some(&client),
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let outcome = resolver.resolve(&ctx).await;
        match outcome {
            ResolverOutcome::Resolved { value, confidence, .. } => {
                assert_eq!(value, serde_json::json!("a@b.com"));
                assert!(confidence >= 0.55);
            }
            other => panic!("expected Resolved, got {:?}", other),
        }

        let usage = shared.llm.lock().await.snapshot_usage();
        assert_eq!(usage.total_invocations, 1);
        assert_eq!(usage.total_tokens, 42);
        assert_eq!(usage.resolved_fields, 1);
    }

    #[tokio::test]
    async fn reuses_already_resolved_field_without_reinvoking() {
        let resolver = LlmFallbackResolver;
        let client = StubClient {
            values: HashMap::from([("email".to_string(), serde_json::json!("a@b.com"))]),
            tokens: 10,
        };
        let plan = plan_with(&["email"]);
        let step = plan.steps[0].clone();
        let schema = indexmap::IndexMap::new();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: "irrelevant",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: Some(&client),
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        resolver.resolve(&ctx).await;
        let second = resolver.resolve(&ctx).await;
        assert!(matches!(second, ResolverOutcome::Resolved { .. }));

        let usage = shared.llm.lock().await.snapshot_usage();
        assert_eq!(usage.total_invocations, 1);
        assert_eq!(usage.reused_resolutions, 1);
    }

    #[test]
    fn trim_for_llm_leaves_short_input_untouched() {
        assert_eq!(trim_for_llm("hello", 100), "hello");
    }

    #[test]
    fn trim_for_llm_truncates_and_marks_long_input() {
        let input = "x".repeat(50);
        let trimmed = trim_for_llm(&input, 20);
        assert!(trimmed.len() <= 20 + TRUNCATION_MARKER.len());
        assert!(trimmed.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn skips_when_plan_confidence_at_or_above_gate() {
        let resolver = LlmFallbackResolver;
        let client = StubClient {
            values: HashMap::from([("email".to_string(), serde_json::json!("a@b.com"))]),
            tokens: 10,
        };
        let mut plan = plan_with(&["email"]);
        plan.metadata.planner_confidence = Some(0.8);
        let step = plan.steps[0].clone();
        let schema = indexmap::IndexMap::new();
        let mut options = ParseOptions::default();
        options.lean_llm = Some(LeanLLMRuntimeOptions {
            plan_confidence_gate: Some(0.4),
            ..Default::default()
        });
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: "irrelevant",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: Some(&client),
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let outcome = resolver.resolve(&ctx).await;
        assert!(matches!(outcome, ResolverOutcome::NotFound));
        let usage = shared.llm.lock().await.snapshot_usage();
        assert_eq!(usage.skipped_by_plan_confidence, 1);
        assert_eq!(usage.total_invocations, 0);
    }

    #[tokio::test]
    async fn invokes_when_plan_confidence_below_gate() {
        let resolver = LlmFallbackResolver;
        let client = StubClient {
            values: HashMap::from([("email".to_string(), serde_json::json!("a@b.com"))]),
            tokens: 10,
        };
        let mut plan = plan_with(&["email"]);
        plan.metadata.planner_confidence = Some(0.1);
        let step = plan.steps[0].clone();
        let schema = indexmap::IndexMap::new();
        let mut options = ParseOptions::default();
        options.lean_llm = Some(LeanLLMRuntimeOptions {
            plan_confidence_gate: Some(0.4),
            ..Default::default()
        });
        let shared = SharedParseState::new();
        let ctx = ResolverContext {
            input_data: "irrelevant",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: Some(&client),
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let outcome = resolver.resolve(&ctx).await;
        match outcome {
            ResolverOutcome::Resolved { value, .. } => assert_eq!(value, serde_json::json!("a@b.com")),
            other => panic!("expected Resolved, got {:?}", other),
        }
        let usage = shared.llm.lock().await.snapshot_usage();
        assert_eq!(usage.skipped_by_plan_confidence, 0);
        assert_eq!(usage.total_invocations, 1);
    }
}
