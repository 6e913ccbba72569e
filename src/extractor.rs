//! The Extractor: walks a `SearchPlan`'s steps in order, running each
//! through the `ResolverRegistry` and assembling the parsed output.
//!
//! `SearchPlan.strategy` is carried as metadata only — every plan runs
//! sequentially here regardless of its declared strategy (see DESIGN.md
//! for the Open Question this resolves). Sequential execution keeps the
//! LLM fallback resolver's cooldown/budget bookkeeping trivially correct:
//! at most one step is ever touching `SharedParseState.llm` at a time.

use crate::llm::LeanLLMFieldClient;
use crate::resolvers::{ResolverContext, ResolverRegistry, SharedParseState};
use crate::types::{
    LeanLLMFallbackUsageSummary, ParseDiagnostic, ParseRequest, RequestId, SearchPlan, SessionId,
    Severity, Stage,
};
use std::collections::HashMap;

pub struct ExtractionOutput {
    pub parsed_data: HashMap<String, serde_json::Value>,
    /// Debug/supplemental readout of the resolver confidence behind each
    /// *resolved* field. It never participates in the pass/fail
    /// invariants — those stay keyed off `confidence`, the step-confidence
    /// mean computed over every step (resolved or not).
    pub per_field_confidence: HashMap<String, f64>,
    /// `mean(stepConfidence)` clamped to `[0, 1]`, computed over every step
    /// including ones that resolved to nothing.
    pub confidence: f64,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens_used: u32,
    pub missing_required: Vec<String>,
    pub fallback_usage: Option<LeanLLMFallbackUsageSummary>,
}

#[derive(Clone)]
pub struct Extractor {
    registry: ResolverRegistry,
}

impl Extractor {
    pub fn new(registry: ResolverRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResolverRegistry {
        &mut self.registry
    }

    pub async fn extract(
        &self,
        plan: &SearchPlan,
        request: &ParseRequest,
        llm_field_client: Option<&dyn LeanLLMFieldClient>,
        request_id: RequestId,
        session_id: Option<SessionId>,
        profile: Option<&str>,
    ) -> ExtractionOutput {
        let shared = SharedParseState::new();
        let options = request.options.clone().unwrap_or_default();

        let mut parsed_data = HashMap::new();
        let mut per_field_confidence = HashMap::new();
        let mut diagnostics = Vec::new();
        let mut missing_required = Vec::new();
        let mut step_confidences: Vec<f64> = Vec::new();

        for step in &plan.steps {
            let ctx = ResolverContext {
                input_data: &request.input_data,
                step,
                schema: &request.output_schema,
                instructions: request.instructions.as_deref(),
                plan,
                options: &options,
                shared: &shared,
                llm_field_client,
                request_id,
                session_id,
                profile,
            };

            let resolution = self.registry.resolve_step(&ctx).await;
            diagnostics.extend(resolution.diagnostics);

            let step_confidence = match &resolution.value {
                Some(_) => {
                    let floor = if step.is_required { 0.7 } else { 0.5 };
                    resolution.confidence.max(floor).clamp(0.0, 1.0)
                }
                None if step.is_required => resolution.confidence.clamp(0.0, 1.0),
                None => resolution.confidence.max(0.2).clamp(0.0, 1.0),
            };
            step_confidences.push(step_confidence);

            match resolution.value {
                Some(value) => {
                    if step.is_required && resolution.confidence < plan.confidence_threshold {
                        diagnostics.push(ParseDiagnostic::for_field(
                            step.target_key.clone(),
                            Stage::Extractor,
                            Severity::Warning,
                            format!(
                                "confidence {:.2} below plan threshold {:.2}",
                                resolution.confidence, plan.confidence_threshold
                            ),
                        ));
                    }
                    per_field_confidence.insert(step.target_key.clone(), resolution.confidence);
                    parsed_data.insert(step.target_key.clone(), value);
                }
                None => {
                    if step.is_required {
                        missing_required.push(step.target_key.clone());
                        diagnostics.push(ParseDiagnostic::for_field(
                            step.target_key.clone(),
                            Stage::Extractor,
                            Severity::Error,
                            "required field could not be resolved by any resolver",
                        ));
                    } else {
                        diagnostics.push(ParseDiagnostic::for_field(
                            step.target_key.clone(),
                            Stage::Extractor,
                            Severity::Info,
                            "optional field not found",
                        ));
                    }
                }
            }
        }

        let confidence = if step_confidences.is_empty() {
            1.0
        } else {
            (step_confidences.iter().sum::<f64>() / step_confidences.len() as f64).clamp(0.0, 1.0)
        };

        let fallback_usage = {
            let llm_state = shared.llm.lock().await;
            let usage = llm_state.snapshot_usage();
            (usage.total_invocations > 0 || !usage.fields.is_empty()).then_some(usage)
        };
        let tokens_used = fallback_usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

        ExtractionOutput {
            parsed_data,
            per_field_confidence,
            confidence,
            diagnostics,
            tokens_used,
            missing_required,
            fallback_usage,
        }
    }
}
