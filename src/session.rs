//! Session: binds a schema/instructions/options triple, amortizes Architect
//! cost across many inputs, and owns plan-cache persistence and
//! auto-refresh.
//!
//! A long-lived, mutation-guarded state object with its own background
//! bookkeeping: one `Mutex`-guarded `SessionState` for everything a parse
//! call reads or writes, plus a second guarded block for auto-refresh
//! bookkeeping so a refresh evaluation never blocks a concurrent plan read.

use crate::architect::{Architect, ArchitectContext};
use crate::cache::{canonical_key, PlanCache, PlanCacheEntry};
use crate::config::Config;
use crate::error::{ParseratorError, Result};
use crate::extractor::Extractor;
use crate::processors::ProcessorPipeline;
use crate::queue::AsyncTaskQueue;
use crate::telemetry::{
    AutoRefreshEventEnvelope, CacheEventEnvelope, EventEnvelope, EventSource, RewriteEventEnvelope,
    StageEventEnvelope, TelemetryEvent, TelemetryHub,
};
use crate::types::{
    ParseDiagnostic, ParseError, ParseMetadata, ParseOptions, ParseRequest, ParseResponse,
    PlanOrigin, PlanStrategy, RequestId, SchemaDescriptor, SearchPlan, Severity, Stage,
    StageBreakdown, StageMetrics,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Policy for the post-parse auto-refresh state machine.
#[derive(Debug, Clone)]
pub struct AutoRefreshConfig {
    pub max_parses: u32,
    pub min_confidence: f64,
    pub low_confidence_grace: u32,
    pub min_interval_ms: u64,
}

impl Default for AutoRefreshConfig {
    fn default() -> Self {
        Self {
            max_parses: 25,
            min_confidence: 0.5,
            low_confidence_grace: 1,
            min_interval_ms: 5000,
        }
    }
}

/// Initialization parameters for a new (or rehydrated, via `plan`) session.
#[derive(Clone, Default)]
pub struct SessionInit {
    pub output_schema: indexmap::IndexMap<String, SchemaDescriptor>,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
    pub seed_input: Option<String>,
    pub auto_refresh: Option<AutoRefreshConfig>,
    /// A previously exported plan, for rehydrating a new session with
    /// `init.plan` set. `origin` is coerced to `cached` on load.
    pub plan: Option<SearchPlan>,
}

struct SessionState {
    schema: indexmap::IndexMap<String, SchemaDescriptor>,
    instructions: Option<String>,
    options: Option<ParseOptions>,
    plan: Option<SearchPlan>,
    plan_diagnostics: Vec<ParseDiagnostic>,
    plan_confidence: f64,
    plan_tokens: u32,
    plan_processing_time_ms: u64,
    plan_updated_at: Option<DateTime<Utc>>,
    total_architect_tokens: u32,
    total_extractor_tokens: u32,
    parse_count: u32,
    seed_input: Option<String>,
    last_request_id: Option<RequestId>,
    last_confidence: Option<f64>,
    last_diagnostics: Vec<ParseDiagnostic>,
}

struct AutoRefreshState {
    config: AutoRefreshConfig,
    parses_since_refresh: u32,
    low_confidence_runs: u32,
    pending: bool,
    last_attempt_at: Option<Instant>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Default)]
struct PlanCacheBackground {
    pending_writes: usize,
    last_attempt_at: Option<DateTime<Utc>>,
    last_persist_at: Option<DateTime<Utc>>,
    last_persist_reason: Option<String>,
    last_persist_error: Option<String>,
}

/// Readout of `getPlanState()`.
#[derive(Debug, Clone)]
pub struct PlanState {
    pub ready: bool,
    pub plan: Option<SearchPlan>,
    pub version: Option<u32>,
    pub strategy: Option<PlanStrategy>,
    pub confidence: f64,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
    pub origin: Option<PlanOrigin>,
    pub updated_at: Option<DateTime<Utc>>,
    pub seed_input: Option<String>,
}

/// Overrides accepted by `refresh_plan()`.
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    pub force: bool,
    pub seed_input: Option<String>,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
    pub include_plan: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub success: bool,
    pub skipped: Option<String>,
    pub state: PlanState,
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AutoRefreshSnapshot {
    pub enabled: bool,
    pub parses_since_refresh: u32,
    pub low_confidence_runs: u32,
    pub pending: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: crate::types::SessionId,
    pub created_at: DateTime<Utc>,
    pub parse_count: u32,
    pub total_architect_tokens: u32,
    pub total_extractor_tokens: u32,
    pub last_request_id: Option<RequestId>,
    pub last_confidence: Option<f64>,
    pub last_diagnostics: Vec<ParseDiagnostic>,
    pub auto_refresh: Option<AutoRefreshSnapshot>,
}

#[derive(Debug, Clone)]
pub struct PlanCacheBackgroundState {
    pub pending_writes: usize,
    pub idle: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_persist_at: Option<DateTime<Utc>>,
    pub last_persist_reason: Option<String>,
    pub last_persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AutoRefreshBackgroundState {
    pub in_flight: bool,
}

#[derive(Debug, Clone)]
pub struct BackgroundTaskState {
    pub plan_cache: PlanCacheBackgroundState,
    pub auto_refresh: Option<AutoRefreshBackgroundState>,
}

/// A stateful binding of `{outputSchema, instructions?, options?}` that
/// reuses a plan across many `parse` calls.
pub struct Session {
    id: crate::types::SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    auto_refresh: Option<Mutex<AutoRefreshState>>,
    cache_background: Mutex<PlanCacheBackground>,

    architect: Arc<dyn Architect>,
    extractor: Extractor,
    processors: ProcessorPipeline,
    cache: Option<Arc<dyn PlanCache>>,
    cache_queue: AsyncTaskQueue,
    refresh_queue: AsyncTaskQueue,
    telemetry: TelemetryHub,
    llm_field_client: Option<Arc<dyn crate::llm::LeanLLMFieldClient>>,
    profile: Option<String>,
    config: Config,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        init: SessionInit,
        architect: Arc<dyn Architect>,
        extractor: Extractor,
        processors: ProcessorPipeline,
        cache: Option<Arc<dyn PlanCache>>,
        telemetry: TelemetryHub,
        llm_field_client: Option<Arc<dyn crate::llm::LeanLLMFieldClient>>,
        profile: Option<String>,
        config: Config,
    ) -> Self {
        let plan = init.plan.map(|mut p| {
            p.metadata.origin = PlanOrigin::Cached;
            p
        });
        let plan_confidence = plan
            .as_ref()
            .and_then(|p| p.metadata.planner_confidence)
            .unwrap_or(0.0);
        let plan_tokens = plan.as_ref().map(|p| p.metadata.estimated_tokens).unwrap_or(0);

        let state = SessionState {
            schema: init.output_schema,
            instructions: init.instructions,
            options: init.options,
            plan,
            plan_diagnostics: Vec::new(),
            plan_confidence,
            plan_tokens,
            plan_processing_time_ms: 0,
            plan_updated_at: None,
            total_architect_tokens: 0,
            total_extractor_tokens: 0,
            parse_count: 0,
            seed_input: init.seed_input,
            last_request_id: None,
            last_confidence: None,
            last_diagnostics: Vec::new(),
        };

        let auto_refresh = init.auto_refresh.map(|cfg| {
            Mutex::new(AutoRefreshState {
                config: cfg,
                parses_since_refresh: 0,
                low_confidence_runs: 0,
                pending: false,
                last_attempt_at: None,
                last_success_at: None,
                last_failure_at: None,
                last_error: None,
            })
        });

        Self {
            id: crate::types::SessionId::new(),
            created_at: Utc::now(),
            state: Mutex::new(state),
            auto_refresh,
            cache_background: Mutex::new(PlanCacheBackground::default()),
            architect,
            extractor,
            processors,
            cache,
            cache_queue: AsyncTaskQueue::new(1),
            refresh_queue: AsyncTaskQueue::new(1),
            telemetry,
            llm_field_client,
            profile,
            config,
        }
    }

    pub fn id(&self) -> crate::types::SessionId {
        self.id
    }

    fn cache_key(&self, schema: &indexmap::IndexMap<String, SchemaDescriptor>, instructions: Option<&str>, options: Option<&ParseOptions>) -> String {
        canonical_key(self.profile.as_deref(), schema, instructions, options)
    }

    /// Runs one parse through this session: merges overrides, ensures a
    /// plan exists (cache hit / first-architect-run / reuse), extracts,
    /// postprocesses, applies the confidence gate, and evaluates
    /// auto-refresh.
    pub async fn parse(&self, input: impl Into<String>, overrides: Option<ParseOptions>) -> ParseResponse {
        let request_id = RequestId::new();
        let start = Instant::now();

        let (schema, instructions, options) = {
            let state = self.state.lock().await;
            (
                state.schema.clone(),
                state.instructions.clone(),
                overrides.or_else(|| state.options.clone()),
            )
        };

        let mut request = ParseRequest {
            input_data: input.into(),
            output_schema: schema,
            instructions,
            options,
        };

        self.telemetry
            .emit(TelemetryEvent::ParseStart(self.envelope(request_id, serde_json::json!({}))))
            .await;

        let preprocess_start = Instant::now();
        let preprocess_outcome = self.processors.run_request(&mut request);
        let preprocess_time_ms = preprocess_start.elapsed().as_millis() as u64;

        if let Some(err) = validate_request(&request, &self.config) {
            let response = ParseResponse {
                success: false,
                parsed_data: HashMap::new(),
                metadata: empty_metadata(request_id, err.clone()),
                error: Some(err),
            };
            self.telemetry
                .emit(TelemetryEvent::ParseFailure(
                    self.envelope(request_id, serde_json::json!({"code": "INVALID_REQUEST"})),
                ))
                .await;
            return response;
        }

        let (plan, architect_tokens, architect_time_ms, architect_diagnostics) =
            match self.ensure_plan(&request, request_id).await {
                Ok(result) => result,
                Err(error) => {
                    let parse_error = ParseError {
                        code: error.code().to_string(),
                        message: error.to_string(),
                        stage: Stage::Architect,
                        details: None,
                        suggestion: None,
                    };
                    let response = ParseResponse {
                        success: false,
                        parsed_data: HashMap::new(),
                        metadata: empty_metadata(request_id, parse_error.clone()),
                        error: Some(parse_error),
                    };
                    self.telemetry
                        .emit(TelemetryEvent::ParseFailure(
                            self.envelope(request_id, serde_json::json!({"code": "ARCHITECT_FAILED"})),
                        ))
                        .await;
                    return response;
                }
            };

        self.telemetry
            .emit(TelemetryEvent::PlanReady(
                self.envelope(request_id, serde_json::to_value(&plan).unwrap_or_default()),
            ))
            .await;

        let extractor_start = Instant::now();
        let output = self
            .extractor
            .extract(
                &plan,
                &request,
                self.llm_field_client.as_deref(),
                request_id,
                Some(self.id),
                self.profile.as_deref(),
            )
            .await;
        let extractor_time_ms = extractor_start.elapsed().as_millis() as u64;

        let mut parsed_data = output.parsed_data;
        let postprocess_start = Instant::now();
        let postprocess_outcome = self.processors.run_response(&mut parsed_data);
        let postprocess_time_ms = postprocess_start.elapsed().as_millis() as u64;
        let postprocess_confidence =
            crate::processors::postprocess_confidence_floor(&postprocess_outcome.diagnostics);

        let enable_fallbacks = self.config.enable_field_fallbacks;
        let confidence_threshold = request
            .options
            .as_ref()
            .and_then(|o| o.confidence_threshold)
            .unwrap_or(self.config.min_confidence);

        let confidence = output.confidence.min(postprocess_confidence);

        let mut diagnostics = architect_diagnostics;
        diagnostics.extend(preprocess_outcome.diagnostics.clone());
        diagnostics.extend(output.diagnostics);
        diagnostics.extend(postprocess_outcome.diagnostics.clone());
        let error = if !output.missing_required.is_empty() {
            Some(ParseError {
                code: "MISSING_REQUIRED_FIELDS".to_string(),
                message: format!("required fields unresolved: {}", output.missing_required.join(", ")),
                stage: Stage::Extractor,
                details: Some(serde_json::json!({ "fields": output.missing_required })),
                suggestion: Some("enable field fallbacks or broaden the search instructions".to_string()),
            })
        } else if !enable_fallbacks && confidence < confidence_threshold {
            Some(ParseError {
                code: "LOW_CONFIDENCE".to_string(),
                message: format!("confidence {:.2} below threshold {:.2}", confidence, confidence_threshold),
                stage: Stage::Postprocess,
                details: None,
                suggestion: Some("enable field fallbacks or lower the confidence threshold".to_string()),
            })
        } else {
            None
        };

        if let Some(err) = &error {
            diagnostics.push(ParseDiagnostic::new(err.stage, Severity::Error, err.message.clone()));
        }

        let tokens_used = architect_tokens + output.tokens_used;
        let processing_time_ms = architect_time_ms + extractor_time_ms;

        let metadata = ParseMetadata {
            architect_plan: plan,
            confidence,
            tokens_used,
            processing_time_ms,
            architect_tokens,
            extractor_tokens: output.tokens_used,
            request_id,
            timestamp: Utc::now(),
            diagnostics: diagnostics.clone(),
            stage_breakdown: StageBreakdown {
                preprocess: Some(StageMetrics {
                    time_ms: preprocess_time_ms,
                    tokens: 0,
                    confidence: None,
                    runs: Some(preprocess_outcome.runs),
                }),
                architect: StageMetrics {
                    time_ms: architect_time_ms,
                    tokens: architect_tokens,
                    confidence: None,
                    runs: Some(1),
                },
                extractor: StageMetrics {
                    time_ms: extractor_time_ms,
                    tokens: output.tokens_used,
                    confidence: Some(output.confidence),
                    runs: Some(1),
                },
                postprocess: Some(StageMetrics {
                    time_ms: postprocess_time_ms,
                    tokens: 0,
                    confidence: Some(postprocess_confidence),
                    runs: Some(postprocess_outcome.runs),
                }),
            },
            fallback: output.fallback_usage,
            per_field_confidence: output.per_field_confidence,
        };

        let response = ParseResponse {
            success: error.is_none(),
            parsed_data,
            metadata,
            error,
        };
        response.assert_invariant();

        {
            let mut state = self.state.lock().await;
            state.total_architect_tokens += architect_tokens;
            state.total_extractor_tokens += output.tokens_used;
            state.parse_count += 1;
            state.last_request_id = Some(request_id);
            state.last_confidence = Some(confidence);
            state.last_diagnostics = diagnostics;
        }

        self.telemetry
            .emit(TelemetryEvent::ParseStage(StageEventEnvelope {
                source: EventSource::Session,
                request_id,
                timestamp: Utc::now(),
                profile: self.profile.clone(),
                session_id: Some(self.id),
                stage: "extractor".to_string(),
                metrics: StageMetrics {
                    time_ms: extractor_time_ms,
                    tokens: output.tokens_used,
                    confidence: Some(confidence),
                    runs: Some(1),
                },
                diagnostics: Vec::new(),
            }))
            .await;

        let event = if response.success {
            TelemetryEvent::ParseSuccess(self.envelope(request_id, serde_json::json!({ "confidence": confidence })))
        } else {
            TelemetryEvent::ParseFailure(self.envelope(
                request_id,
                serde_json::json!({ "code": response.error.as_ref().map(|e| e.code.clone()) }),
            ))
        };
        self.telemetry.emit(event).await;

        self.evaluate_auto_refresh(confidence, &request).await;

        let _elapsed = start.elapsed();
        response
    }

    /// Returns the active plan and cost if one exists; otherwise runs the
    /// Architect (cache-first), stores the plan, and enqueues persistence.
    async fn ensure_plan(
        &self,
        request: &ParseRequest,
        request_id: RequestId,
    ) -> Result<(SearchPlan, u32, u64, Vec<ParseDiagnostic>)> {
        {
            let state = self.state.lock().await;
            if let Some(plan) = &state.plan {
                let mut plan = plan.clone();
                plan.metadata.origin = PlanOrigin::Cached;
                return Ok((plan, 0, 0, Vec::new()));
            }
        }

        let key = self.cache_key(&request.output_schema, request.instructions.as_deref(), request.options.as_ref());

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&key).await {
                self.telemetry
                    .emit(TelemetryEvent::PlanCache(CacheEventEnvelope {
                        source: EventSource::Session,
                        request_id,
                        timestamp: Utc::now(),
                        profile: self.profile.clone(),
                        session_id: Some(self.id),
                        action: "hit".to_string(),
                        error: None,
                    }))
                    .await;
                let mut plan = entry.plan;
                plan.metadata.origin = PlanOrigin::Cached;
                self.store_plan(plan.clone(), entry.confidence, entry.diagnostics, "cache-hit")
                    .await;
                return Ok((plan, 0, 0, Vec::new()));
            }
        }

        let start = Instant::now();
        let ctx = ArchitectContext {
            profile: self.profile.clone(),
            request_id: Some(request_id),
            session_id: Some(self.id),
        };
        let outcome = self
            .architect
            .build_plan(request, &ctx)
            .await
            .map_err(|e| ParseratorError::architect_failed(e.to_string()))?;
        let plan = outcome.plan;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let confidence = plan.metadata.planner_confidence.unwrap_or(0.0);
        let tokens = plan.metadata.estimated_tokens;

        self.store_plan(plan.clone(), confidence, outcome.diagnostics.clone(), "architect-run")
            .await;
        self.persist_plan(key, plan.clone(), confidence, elapsed_ms).await;

        Ok((plan, tokens, elapsed_ms, outcome.diagnostics))
    }

    async fn store_plan(&self, plan: SearchPlan, confidence: f64, diagnostics: Vec<ParseDiagnostic>, _reason: &str) {
        let mut state = self.state.lock().await;
        state.plan_tokens = plan.metadata.estimated_tokens;
        state.plan_confidence = confidence;
        state.plan_diagnostics = diagnostics;
        state.plan_updated_at = Some(Utc::now());
        state.plan = Some(plan);
    }

    async fn persist_plan(&self, key: String, plan: SearchPlan, confidence: f64, processing_time_ms: u64) {
        {
            let mut bg = self.cache_background.lock().await;
            bg.pending_writes += 1;
            bg.last_attempt_at = Some(Utc::now());
        }

        if let Some(cache) = self.cache.clone() {
            let telemetry = self.telemetry.clone();
            let profile = self.profile.clone();
            let session_id = self.id;
            let entry = PlanCacheEntry {
                plan,
                confidence,
                diagnostics: Vec::new(),
                tokens_used: 0,
                processing_time_ms,
                updated_at: Utc::now(),
                profile: profile.clone(),
            };
            let result = self
                .cache_queue
                .enqueue(move || async move {
                    cache.set(&key, entry).await;
                    Ok::<(), String>(())
                })
                .await;

            let mut bg = self.cache_background.lock().await;
            bg.pending_writes = bg.pending_writes.saturating_sub(1);
            match &result {
                Ok(()) => {
                    bg.last_persist_at = Some(Utc::now());
                    bg.last_persist_reason = Some("plan-update".to_string());
                    bg.last_persist_error = None;
                }
                Err(e) => {
                    bg.last_persist_error = Some(e.clone());
                }
            }
            drop(bg);

            telemetry
                .emit(TelemetryEvent::PlanCache(CacheEventEnvelope {
                    source: EventSource::Session,
                    request_id: RequestId::new(),
                    timestamp: Utc::now(),
                    profile,
                    session_id: Some(session_id),
                    action: "store".to_string(),
                    error: result.err(),
                }))
                .await;
        } else {
            let mut bg = self.cache_background.lock().await;
            bg.pending_writes = bg.pending_writes.saturating_sub(1);
        }
    }

    pub async fn get_plan_state(&self, include_plan: bool) -> PlanState {
        let state = self.state.lock().await;
        PlanState {
            ready: state.plan.is_some(),
            plan: if include_plan { state.plan.clone() } else { None },
            version: state.plan.as_ref().map(|p| p.version),
            strategy: state.plan.as_ref().map(|p| p.strategy),
            confidence: state.plan_confidence,
            diagnostics: state.plan_diagnostics.clone(),
            tokens_used: state.plan_tokens,
            processing_time_ms: state.plan_processing_time_ms,
            origin: state.plan.as_ref().map(|p| p.metadata.origin),
            updated_at: state.plan_updated_at,
            seed_input: state.seed_input.clone(),
        }
    }

    /// Re-runs the Architect. On failure, restores the previous plan,
    /// options, instructions, and seed input atomically.
    pub async fn refresh_plan(&self, opts: RefreshOptions) -> RefreshOutcome {
        let (previous_schema, previous_instructions, previous_options, previous_seed) = {
            let state = self.state.lock().await;
            (
                state.schema.clone(),
                state.instructions.clone(),
                state.options.clone(),
                state.seed_input.clone(),
            )
        };

        if !opts.force {
            let state = self.state.lock().await;
            if state.plan.is_some()
                && opts.instructions.is_none()
                && opts.options.is_none()
                && opts.seed_input.is_none()
            {
                return RefreshOutcome {
                    success: true,
                    skipped: Some("no-op".to_string()),
                    state: self.get_plan_state_locked(&state, opts.include_plan),
                    failure: None,
                };
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Some(instructions) = opts.instructions.clone() {
                state.instructions = Some(instructions);
            }
            if let Some(options) = opts.options.clone() {
                state.options = Some(options);
            }
            if let Some(seed) = opts.seed_input.clone() {
                state.seed_input = Some(seed.clone());
            }
        }

        let seed_input = opts
            .seed_input
            .clone()
            .or(previous_seed.clone())
            .unwrap_or_default();
        let (instructions, options) = {
            let state = self.state.lock().await;
            (state.instructions.clone(), state.options.clone())
        };
        let request = ParseRequest {
            input_data: seed_input,
            output_schema: previous_schema.clone(),
            instructions,
            options,
        };

        let request_id = RequestId::new();
        let ctx = ArchitectContext {
            profile: self.profile.clone(),
            request_id: Some(request_id),
            session_id: Some(self.id),
        };

        self.telemetry
            .emit(TelemetryEvent::PlanRewrite(RewriteEventEnvelope {
                source: EventSource::Session,
                request_id,
                timestamp: Utc::now(),
                profile: self.profile.clone(),
                session_id: Some(self.id),
                phase: "started".to_string(),
                error: None,
            }))
            .await;

        match self.architect.build_plan(&request, &ctx).await {
            Ok(outcome) => {
                let plan = outcome.plan;
                let confidence = plan.metadata.planner_confidence.unwrap_or(0.0);
                self.store_plan(plan.clone(), confidence, outcome.diagnostics, "refresh").await;
                let key = self.cache_key(&previous_schema, request.instructions.as_deref(), request.options.as_ref());
                self.persist_plan(key, plan, confidence, 0).await;

                self.telemetry
                    .emit(TelemetryEvent::PlanRewrite(RewriteEventEnvelope {
                        source: EventSource::Session,
                        request_id,
                        timestamp: Utc::now(),
                        profile: self.profile.clone(),
                        session_id: Some(self.id),
                        phase: "applied".to_string(),
                        error: None,
                    }))
                    .await;

                let state = self.state.lock().await;
                RefreshOutcome {
                    success: true,
                    skipped: None,
                    state: self.get_plan_state_locked(&state, opts.include_plan),
                    failure: None,
                }
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.instructions = previous_instructions;
                state.options = previous_options;
                state.seed_input = previous_seed;

                self.telemetry
                    .emit(TelemetryEvent::PlanRewrite(RewriteEventEnvelope {
                        source: EventSource::Session,
                        request_id,
                        timestamp: Utc::now(),
                        profile: self.profile.clone(),
                        session_id: Some(self.id),
                        phase: "failed".to_string(),
                        error: Some(e.to_string()),
                    }))
                    .await;

                RefreshOutcome {
                    success: false,
                    skipped: None,
                    state: self.get_plan_state_locked(&state, opts.include_plan),
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    fn get_plan_state_locked(&self, state: &SessionState, include_plan: bool) -> PlanState {
        PlanState {
            ready: state.plan.is_some(),
            plan: if include_plan { state.plan.clone() } else { None },
            version: state.plan.as_ref().map(|p| p.version),
            strategy: state.plan.as_ref().map(|p| p.strategy),
            confidence: state.plan_confidence,
            diagnostics: state.plan_diagnostics.clone(),
            tokens_used: state.plan_tokens,
            processing_time_ms: state.plan_processing_time_ms,
            origin: state.plan.as_ref().map(|p| p.metadata.origin),
            updated_at: state.plan_updated_at,
            seed_input: state.seed_input.clone(),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        let auto_refresh = match &self.auto_refresh {
            Some(ar) => {
                let ar = ar.lock().await;
                Some(AutoRefreshSnapshot {
                    enabled: true,
                    parses_since_refresh: ar.parses_since_refresh,
                    low_confidence_runs: ar.low_confidence_runs,
                    pending: ar.pending,
                    last_success_at: ar.last_success_at,
                    last_failure_at: ar.last_failure_at,
                    last_error: ar.last_error.clone(),
                })
            }
            None => None,
        };

        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            parse_count: state.parse_count,
            total_architect_tokens: state.total_architect_tokens,
            total_extractor_tokens: state.total_extractor_tokens,
            last_request_id: state.last_request_id,
            last_confidence: state.last_confidence,
            last_diagnostics: state.last_diagnostics.clone(),
            auto_refresh,
        }
    }

    pub async fn get_background_task_state(&self) -> BackgroundTaskState {
        let bg = self.cache_background.lock().await;
        let plan_cache = PlanCacheBackgroundState {
            pending_writes: bg.pending_writes,
            idle: bg.pending_writes == 0,
            last_attempt_at: bg.last_attempt_at,
            last_persist_at: bg.last_persist_at,
            last_persist_reason: bg.last_persist_reason.clone(),
            last_persist_error: bg.last_persist_error.clone(),
        };
        let auto_refresh = match &self.auto_refresh {
            Some(ar) => Some(AutoRefreshBackgroundState {
                in_flight: ar.lock().await.pending,
            }),
            None => None,
        };
        BackgroundTaskState { plan_cache, auto_refresh }
    }

    /// Awaits cache-queue idle and any in-flight refresh.
    pub async fn wait_for_idle_tasks(&self) {
        self.cache_queue.on_idle().await;
        self.refresh_queue.on_idle().await;
    }

    /// A snapshot suitable for hydrating a new session elsewhere.
    pub async fn export_init(&self) -> SessionInit {
        let state = self.state.lock().await;
        SessionInit {
            output_schema: state.schema.clone(),
            instructions: state.instructions.clone(),
            options: state.options.clone(),
            seed_input: state.seed_input.clone(),
            auto_refresh: None,
            plan: state.plan.clone(),
        }
    }

    /// Increments parse counters and evaluates the confidence/usage
    /// triggers, favouring `confidence` over `usage` when both conditions
    /// hold in the same evaluation.
    async fn evaluate_auto_refresh(&self, confidence: f64, request: &ParseRequest) {
        let Some(auto_refresh) = &self.auto_refresh else {
            return;
        };

        let (triggered, reason) = {
            let mut ar = auto_refresh.lock().await;
            ar.parses_since_refresh += 1;

            if confidence < ar.config.min_confidence {
                ar.low_confidence_runs += 1;
            } else {
                ar.low_confidence_runs = 0;
            }

            let mut reason = None;
            if ar.low_confidence_runs > ar.config.low_confidence_grace {
                reason = Some("confidence");
            } else if ar.parses_since_refresh >= ar.config.max_parses {
                reason = Some("usage");
            }

            let Some(reason) = reason else {
                return;
            };

            if ar.pending {
                self.telemetry
                    .emit(TelemetryEvent::PlanAutoRefresh(AutoRefreshEventEnvelope {
                        source: EventSource::Session,
                        request_id: RequestId::new(),
                        timestamp: Utc::now(),
                        profile: self.profile.clone(),
                        session_id: Some(self.id),
                        phase: "skipped".to_string(),
                        reason: Some("pending".to_string()),
                    }))
                    .await;
                return;
            }

            if let Some(last) = ar.last_attempt_at {
                if last.elapsed().as_millis() < ar.config.min_interval_ms as u128 {
                    self.telemetry
                        .emit(TelemetryEvent::PlanAutoRefresh(AutoRefreshEventEnvelope {
                            source: EventSource::Session,
                            request_id: RequestId::new(),
                            timestamp: Utc::now(),
                            profile: self.profile.clone(),
                            session_id: Some(self.id),
                            phase: "skipped".to_string(),
                            reason: Some("cooldown".to_string()),
                        }))
                        .await;
                    return;
                }
            }

            ar.pending = true;
            ar.last_attempt_at = Some(Instant::now());
            (true, reason)
        };

        if !triggered {
            return;
        }

        self.telemetry
            .emit(TelemetryEvent::PlanAutoRefresh(AutoRefreshEventEnvelope {
                source: EventSource::Session,
                request_id: RequestId::new(),
                timestamp: Utc::now(),
                profile: self.profile.clone(),
                session_id: Some(self.id),
                phase: "triggered".to_string(),
                reason: Some(reason.to_string()),
            }))
            .await;

        let outcome = self
            .refresh_queue
            .enqueue(|| async {
                let outcome = self
                    .refresh_plan(RefreshOptions {
                        force: true,
                        seed_input: Some(request.input_data.clone()),
                        instructions: None,
                        options: None,
                        include_plan: false,
                    })
                    .await;
                Ok::<_, String>(outcome)
            })
            .await
            .expect("refresh_plan never returns Err");

        let mut ar = auto_refresh.lock().await;
        ar.pending = false;
        ar.parses_since_refresh = 0;
        ar.low_confidence_runs = 0;
        if outcome.success {
            ar.last_success_at = Some(Utc::now());
            ar.last_error = None;
        } else {
            ar.last_failure_at = Some(Utc::now());
            ar.last_error = outcome.failure.clone();
        }
        drop(ar);

        self.telemetry
            .emit(TelemetryEvent::PlanAutoRefresh(AutoRefreshEventEnvelope {
                source: EventSource::Session,
                request_id: RequestId::new(),
                timestamp: Utc::now(),
                profile: self.profile.clone(),
                session_id: Some(self.id),
                phase: if outcome.success { "completed" } else { "failed" }.to_string(),
                reason: None,
            }))
            .await;
    }

    fn envelope(&self, request_id: RequestId, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            source: EventSource::Session,
            request_id,
            timestamp: Utc::now(),
            profile: self.profile.clone(),
            session_id: Some(self.id),
            payload,
        }
    }
}

fn validate_request(request: &ParseRequest, config: &Config) -> Option<ParseError> {
    if request.input_data.trim().is_empty() {
        return Some(invalid_request("inputData must be a non-empty string"));
    }
    if request.input_data.len() > config.max_input_length {
        return Some(invalid_request(format!(
            "inputData exceeds maxInputLength ({})",
            config.max_input_length
        )));
    }
    if request.output_schema.is_empty() || request.output_schema.len() > config.max_schema_fields {
        return Some(invalid_request(format!(
            "outputSchema must have 1..{} entries",
            config.max_schema_fields
        )));
    }
    if let Some(threshold) = request.options.as_ref().and_then(|o| o.confidence_threshold) {
        if !(0.0..=1.0).contains(&threshold) {
            return Some(invalid_request("options.confidenceThreshold must be in [0,1]"));
        }
    }
    None
}

fn invalid_request(message: impl Into<String>) -> ParseError {
    ParseError {
        code: "INVALID_REQUEST".to_string(),
        message: message.into(),
        stage: Stage::Validation,
        details: None,
        suggestion: None,
    }
}

fn empty_metadata(request_id: RequestId, error: ParseError) -> ParseMetadata {
    ParseMetadata {
        architect_plan: crate::types::SearchPlan {
            id: crate::types::PlanId::new(),
            version: 0,
            steps: Vec::new(),
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.0,
            metadata: crate::types::PlanMetadata {
                detected_format: "unknown".to_string(),
                complexity: crate::types::PlanComplexity::Low,
                estimated_tokens: 0,
                origin: PlanOrigin::Heuristic,
                planner_confidence: None,
                context: None,
            },
        },
        confidence: 0.0,
        tokens_used: 0,
        processing_time_ms: 0,
        architect_tokens: 0,
        extractor_tokens: 0,
        request_id,
        timestamp: Utc::now(),
        diagnostics: vec![ParseDiagnostic::new(error.stage, Severity::Error, error.message.clone())],
        stage_breakdown: StageBreakdown::default(),
        fallback: None,
        per_field_confidence: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architect::HeuristicArchitect;
    use crate::cache::InMemoryPlanCache;
    use crate::resolvers::{DefaultResolver, JsonPathResolver, ResolverRegistry, SectionResolver};
    use crate::types::SchemaDescriptor;

    fn build_session(auto_refresh: Option<AutoRefreshConfig>) -> Session {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(JsonPathResolver));
        registry.register(Arc::new(SectionResolver));
        registry.register(Arc::new(DefaultResolver));

        let mut schema = indexmap::IndexMap::new();
        schema.insert("email".to_string(), SchemaDescriptor::Hint("email".to_string()));

        Session::new(
            SessionInit {
                output_schema: schema,
                instructions: None,
                options: None,
                seed_input: None,
                auto_refresh,
                plan: None,
            },
            Arc::new(HeuristicArchitect),
            Extractor::new(registry),
            ProcessorPipeline::new(),
            Some(Arc::new(InMemoryPlanCache::new())),
            TelemetryHub::new(),
            None,
            None,
            Config::default(),
        )
    }

    #[tokio::test]
    async fn first_parse_charges_architect_tokens_and_subsequent_reuse_cached_plan() {
        let session = build_session(None);

        let first = session.parse("Email: a@b.com", None).await;
        assert!(first.success);
        assert!(first.metadata.architect_tokens > 0);
        let plan_id = first.metadata.architect_plan.id;

        let second = session.parse("Email: c@d.com", None).await;
        assert!(second.success);
        assert_eq!(second.metadata.architect_tokens, 0);
        assert_eq!(second.metadata.architect_plan.id, plan_id);
        assert_eq!(second.metadata.architect_plan.metadata.origin, PlanOrigin::Cached);
    }

    #[tokio::test]
    async fn export_init_round_trips_plan() {
        let session = build_session(None);
        let _ = session.parse("Email: a@b.com", None).await;
        let exported = session.export_init().await;
        assert!(exported.plan.is_some());
        assert_eq!(exported.plan.as_ref().unwrap().metadata.origin, PlanOrigin::Heuristic);
    }

    #[tokio::test]
    async fn wait_for_idle_tasks_resolves_after_persistence() {
        let session = build_session(None);
        let _ = session.parse("Email: a@b.com", None).await;
        session.wait_for_idle_tasks().await;
        let bg = session.get_background_task_state().await;
        assert!(bg.plan_cache.idle);
    }

    #[tokio::test]
    async fn auto_refresh_triggers_on_sustained_low_confidence() {
        let session = build_session(Some(AutoRefreshConfig {
            max_parses: 100,
            min_confidence: 0.95,
            low_confidence_grace: 0,
            min_interval_ms: 0,
        }));

        let _ = session.parse("Email: a@b.com", None).await;
        session.wait_for_idle_tasks().await;

        let snapshot = session.snapshot().await;
        let auto_refresh = snapshot.auto_refresh.expect("auto-refresh enabled");
        assert_eq!(auto_refresh.parses_since_refresh, 0);
        assert!(auto_refresh.last_success_at.is_some());
    }
}
