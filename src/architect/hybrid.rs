//! The hybrid Architect: heuristic plan first, escalated to an injected
//! `LeanLLMPlanClient` rewrite when heuristic confidence is low. Rewrites
//! are funneled through an `AsyncTaskQueue` so a burst of low-confidence
//! plans can't flood the collaborator, and a cooldown guards against
//! re-issuing a rewrite for the same architect instance faster than it can
//! reasonably respond.

use crate::architect::{build_heuristic_plan, Architect, ArchitectContext, ArchitectOutcome};
use crate::error::Result;
use crate::llm::{LeanLLMContext, LeanLLMPlanClient, LeanLLMUsage, PlanRewriteRequest};
use crate::queue::{AsyncTaskQueue, QueueMetrics};
use crate::telemetry::{EventSource, RewriteEventEnvelope, TelemetryEvent, TelemetryHub};
use crate::types::{ParseDiagnostic, ParseRequest, PlanOrigin, Severity, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Readout of the hybrid rewrite subsystem's state.
#[derive(Debug, Clone)]
pub struct RewriteState {
    pub enabled: bool,
    pub concurrency: usize,
    pub cooldown_ms: u64,
    pub pending_cooldown: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_usage: Option<LeanLLMUsage>,
    pub queue: QueueMetrics,
}

#[derive(Default)]
struct RewriteBookkeeping {
    last_attempt_at: Option<Instant>,
    last_attempt_wall: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_usage: Option<LeanLLMUsage>,
}

pub struct HybridArchitect {
    plan_client: Option<Arc<dyn LeanLLMPlanClient>>,
    queue: AsyncTaskQueue,
    concurrency: usize,
    rewrite_confidence_threshold: f64,
    cooldown_ms: u64,
    bookkeeping: Mutex<RewriteBookkeeping>,
    telemetry: Option<TelemetryHub>,
}

impl HybridArchitect {
    pub fn new(plan_client: Option<Arc<dyn LeanLLMPlanClient>>) -> Self {
        Self {
            plan_client,
            queue: AsyncTaskQueue::new(2),
            concurrency: 2,
            rewrite_confidence_threshold: 0.75,
            cooldown_ms: 3000,
            bookkeeping: Mutex::new(RewriteBookkeeping::default()),
            telemetry: None,
        }
    }

    pub fn with_rewrite_confidence_threshold(mut self, threshold: f64) -> Self {
        self.rewrite_confidence_threshold = threshold;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.queue = AsyncTaskQueue::new(concurrency);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Wires a telemetry hub so `plan:rewrite` events are emitted directly
    /// from the Architect, not just from `Session::refresh_plan`.
    pub fn with_telemetry(mut self, telemetry: TelemetryHub) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Current rewrite subsystem state.
    pub async fn rewrite_state(&self) -> RewriteState {
        let bk = self.bookkeeping.lock().await;
        let pending_cooldown = bk
            .last_attempt_at
            .map(|last| last.elapsed() < Duration::from_millis(self.cooldown_ms))
            .unwrap_or(false);
        RewriteState {
            enabled: self.plan_client.is_some(),
            concurrency: self.concurrency,
            cooldown_ms: self.cooldown_ms,
            pending_cooldown,
            last_attempt_at: bk.last_attempt_wall,
            last_success_at: bk.last_success_at,
            last_failure_at: bk.last_failure_at,
            last_error: bk.last_error.clone(),
            last_usage: bk.last_usage.clone(),
            queue: self.queue.metrics().await,
        }
    }

    async fn emit(&self, request_id: crate::types::RequestId, ctx: &ArchitectContext, phase: &str, error: Option<String>) {
        if let Some(telemetry) = &self.telemetry {
            telemetry
                .emit(TelemetryEvent::PlanRewrite(RewriteEventEnvelope {
                    source: EventSource::Session,
                    request_id,
                    timestamp: Utc::now(),
                    profile: ctx.profile.clone(),
                    session_id: ctx.session_id,
                    phase: phase.to_string(),
                    error,
                }))
                .await;
        }
    }
}

#[async_trait]
impl Architect for HybridArchitect {
    async fn build_plan(&self, request: &ParseRequest, ctx: &ArchitectContext) -> Result<ArchitectOutcome> {
        let heuristic_plan = build_heuristic_plan(request);
        let heuristic_confidence = heuristic_plan.metadata.planner_confidence.unwrap_or(0.0);
        let request_id = ctx.request_id.unwrap_or_else(crate::types::RequestId::new);

        let client = match &self.plan_client {
            Some(c) => c.clone(),
            None => return Ok(ArchitectOutcome::plain(heuristic_plan)),
        };
        if heuristic_confidence >= self.rewrite_confidence_threshold {
            return Ok(ArchitectOutcome::plain(heuristic_plan));
        }

        {
            let mut bk = self.bookkeeping.lock().await;
            if let Some(prev) = bk.last_attempt_at {
                if prev.elapsed() < Duration::from_millis(self.cooldown_ms) {
                    self.emit(request_id, ctx, "skipped", Some("cooldown".to_string())).await;
                    return Ok(ArchitectOutcome::plain(heuristic_plan));
                }
            }
            bk.last_attempt_at = Some(Instant::now());
            bk.last_attempt_wall = Some(Utc::now());
        }

        self.emit(request_id, ctx, "queued", None).await;

        let rewrite_request = PlanRewriteRequest {
            input_data: request.input_data.clone(),
            output_schema: request.output_schema.clone(),
            instructions: request.instructions.clone(),
            heuristic_plan: heuristic_plan.clone(),
            diagnostics: Vec::new(),
            context: LeanLLMContext {
                profile: ctx.profile.clone(),
                request_id: ctx.request_id,
                session_id: ctx.session_id,
            },
        };

        self.emit(request_id, ctx, "started", None).await;
        let result = self
            .queue
            .enqueue(move || async move { client.rewrite(rewrite_request).await })
            .await;

        match result {
            Ok(response) => match response.plan {
                Some(mut plan) => {
                    plan.metadata.origin = PlanOrigin::Model;
                    let rewrite_confidence = response.confidence.unwrap_or(self.rewrite_confidence_threshold);
                    let confidence = heuristic_confidence.max(rewrite_confidence);
                    plan.metadata.planner_confidence = Some(confidence);

                    {
                        let mut bk = self.bookkeeping.lock().await;
                        bk.last_success_at = Some(Utc::now());
                        bk.last_error = None;
                        bk.last_usage = response.usage.clone();
                    }
                    self.emit(request_id, ctx, "applied", None).await;

                    let mut diagnostics = vec![ParseDiagnostic::new(
                        Stage::Architect,
                        Severity::Info,
                        "Lean LLM rewrite applied".to_string(),
                    )];
                    if let Some(usage) = &response.usage {
                        diagnostics.push(ParseDiagnostic::new(
                            Stage::Architect,
                            Severity::Info,
                            format!(
                                "lean-llm rewrite usage: {} tokens, {}ms, model={}",
                                usage.tokens_used.unwrap_or(0),
                                usage.latency_ms.unwrap_or(0),
                                usage.model.as_deref().unwrap_or("unknown"),
                            ),
                        ));
                    }
                    if let Some(extra) = response.diagnostics {
                        diagnostics.extend(extra);
                    }

                    Ok(ArchitectOutcome { plan, diagnostics })
                }
                None => {
                    let mut bk = self.bookkeeping.lock().await;
                    bk.last_failure_at = Some(Utc::now());
                    bk.last_error = Some("empty rewrite response".to_string());
                    drop(bk);
                    self.emit(request_id, ctx, "failed", Some("empty rewrite response".to_string()))
                        .await;
                    Ok(ArchitectOutcome {
                        plan: heuristic_plan,
                        diagnostics: vec![ParseDiagnostic::new(
                            Stage::Architect,
                            Severity::Warning,
                            "lean-llm rewrite returned no plan; keeping heuristic plan".to_string(),
                        )],
                    })
                }
            },
            Err(message) => {
                let mut bk = self.bookkeeping.lock().await;
                bk.last_failure_at = Some(Utc::now());
                bk.last_error = Some(message.clone());
                drop(bk);
                self.emit(request_id, ctx, "failed", Some(message.clone())).await;
                Ok(ArchitectOutcome {
                    plan: heuristic_plan,
                    diagnostics: vec![ParseDiagnostic::new(
                        Stage::Architect,
                        Severity::Warning,
                        format!("lean-llm rewrite failed: {message}; keeping heuristic plan"),
                    )],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PlanRewriteResponse;
    use crate::types::{SearchStep, ValidationType};
    use async_trait::async_trait;

    struct StubPlanClient;

    #[async_trait]
    impl LeanLLMPlanClient for StubPlanClient {
        async fn rewrite(&self, request: PlanRewriteRequest) -> std::result::Result<PlanRewriteResponse, String> {
            let mut plan = request.heuristic_plan;
            plan.steps.push(SearchStep {
                target_key: "bonus".to_string(),
                description: "model-added field".to_string(),
                search_instruction: "find bonus".to_string(),
                validation_type: ValidationType::String,
                is_required: false,
            });
            Ok(PlanRewriteResponse {
                plan: Some(plan),
                confidence: Some(0.9),
                diagnostics: None,
                usage: Some(LeanLLMUsage {
                    tokens_used: Some(120),
                    latency_ms: Some(450),
                    model: Some("stub-model".to_string()),
                }),
                raw: None,
            })
        }
    }

    fn request() -> ParseRequest {
        let mut schema = indexmap::IndexMap::new();
        schema.insert(
            "a".to_string(),
            crate::types::SchemaDescriptor::Hint("string".to_string()),
        );
        ParseRequest {
            input_data: "x".to_string(),
            output_schema: schema,
            instructions: None,
            options: None,
        }
    }

    #[tokio::test]
    async fn low_confidence_plan_triggers_rewrite() {
        let architect = HybridArchitect::new(Some(Arc::new(StubPlanClient)))
            .with_rewrite_confidence_threshold(0.99);
        let ctx = ArchitectContext::default();
        let outcome = architect.build_plan(&request(), &ctx).await.unwrap();
        assert_eq!(outcome.plan.metadata.origin, PlanOrigin::Model);
        assert!(outcome.plan.steps.iter().any(|s| s.target_key == "bonus"));
        assert!(outcome.diagnostics.iter().any(|d| d.message.contains("rewrite applied")));
        assert!(outcome.diagnostics.iter().any(|d| d.message.contains("stub-model")));

        let state = architect.rewrite_state().await;
        assert!(state.enabled);
        assert!(state.last_success_at.is_some());
        assert!(state.last_usage.is_some());
    }

    #[tokio::test]
    async fn rewrite_confidence_is_max_of_heuristic_and_model() {
        let architect = HybridArchitect::new(Some(Arc::new(StubPlanClient)))
            .with_rewrite_confidence_threshold(0.99);
        let ctx = ArchitectContext::default();
        let outcome = architect.build_plan(&request(), &ctx).await.unwrap();
        let heuristic = build_heuristic_plan(&request()).metadata.planner_confidence.unwrap();
        assert!(outcome.plan.metadata.planner_confidence.unwrap() >= heuristic);
        assert!(outcome.plan.metadata.planner_confidence.unwrap() >= 0.9);
    }

    #[tokio::test]
    async fn high_confidence_plan_skips_rewrite() {
        let architect = HybridArchitect::new(Some(Arc::new(StubPlanClient)))
            .with_rewrite_confidence_threshold(0.0);
        let ctx = ArchitectContext::default();
        let outcome = architect.build_plan(&request(), &ctx).await.unwrap();
        assert_eq!(outcome.plan.metadata.origin, PlanOrigin::Heuristic);
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn no_client_falls_back_to_heuristic() {
        let architect = HybridArchitect::new(None);
        let ctx = ArchitectContext::default();
        let outcome = architect.build_plan(&request(), &ctx).await.unwrap();
        assert_eq!(outcome.plan.metadata.origin, PlanOrigin::Heuristic);

        let state = architect.rewrite_state().await;
        assert!(!state.enabled);
    }
}
