//! `FieldResolver` trait, resolution context, and the chain-iteration
//! registry.

use crate::heuristics::Section;
use crate::llm::LeanLLMFieldClient;
use crate::resolvers::llm_fallback::LlmFallbackState;
use crate::types::{
    ParseDiagnostic, ParseOptions, RequestId, SchemaDescriptor, SearchPlan, SearchStep,
    SessionId, Severity, Stage,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything a resolver may need to look at for one step. Borrowed rather
/// than owned: the registry drives one resolution at a time and every
/// resolver's `resolve` call completes before the next step borrows again.
pub struct ResolverContext<'a> {
    pub input_data: &'a str,
    pub step: &'a SearchStep,
    pub schema: &'a indexmap::IndexMap<String, SchemaDescriptor>,
    pub instructions: Option<&'a str>,
    pub plan: &'a SearchPlan,
    pub options: &'a ParseOptions,
    pub shared: &'a SharedParseState,
    pub llm_field_client: Option<&'a (dyn LeanLLMFieldClient + 'a)>,
    pub request_id: RequestId,
    pub session_id: Option<SessionId>,
    pub profile: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum ResolverOutcome {
    Resolved {
        value: serde_json::Value,
        confidence: f64,
        diagnostics: Vec<ParseDiagnostic>,
    },
    NotFound,
    Failed {
        message: String,
    },
}

/// State shared across every step of a single parse: the memoized JSON
/// parse of `inputData`, the memoized section segmentation, and the LLM
/// fallback's in-progress/completed resolutions.
///
/// A concrete struct with one field per canonical key rather than a
/// loosely-typed string-keyed bag, since the key set is statically known.
pub struct SharedParseState {
    parsed_json: Mutex<Option<Arc<Result<serde_json::Value, String>>>>,
    sections: Mutex<Option<Arc<Vec<Section>>>>,
    pub llm: Mutex<LlmFallbackState>,
}

impl SharedParseState {
    pub fn new() -> Self {
        Self {
            parsed_json: Mutex::new(None),
            sections: Mutex::new(None),
            llm: Mutex::new(LlmFallbackState::new()),
        }
    }

    /// Parses `inputData` as JSON at most once per parse; every subsequent
    /// call (from any resolver, for any field) reuses the memoized result.
    pub async fn parsed_json(&self, input_data: &str) -> Arc<Result<serde_json::Value, String>> {
        let mut guard = self.parsed_json.lock().await;
        if let Some(cached) = &*guard {
            return cached.clone();
        }
        let parsed = serde_json::from_str::<serde_json::Value>(input_data).map_err(|e| e.to_string());
        let arc = Arc::new(parsed);
        *guard = Some(arc.clone());
        arc
    }

    /// Segments `inputData` into headed sections at most once per parse.
    pub async fn sections(&self, input_data: &str) -> Arc<Vec<Section>> {
        let mut guard = self.sections.lock().await;
        if let Some(cached) = &*guard {
            return cached.clone();
        }
        let sections = Arc::new(crate::heuristics::segment_structured_text(input_data));
        *guard = Some(sections.clone());
        sections
    }
}

impl Default for SharedParseState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single extraction strategy. Resolvers are chained in registration
/// order by `ResolverRegistry`; the first to resolve a value wins.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap, synchronous eligibility check run before `resolve`. Default
    /// accepts every step; resolvers that only apply to certain validation
    /// types or input formats override this to skip cheaply.
    fn supports(&self, ctx: &ResolverContext<'_>) -> bool {
        let _ = ctx;
        true
    }

    async fn resolve(&self, ctx: &ResolverContext<'_>) -> ResolverOutcome;
}

/// The outcome of running the full chain for one step.
#[derive(Debug, Clone, Default)]
pub struct StepResolution {
    pub value: Option<serde_json::Value>,
    pub confidence: f64,
    pub resolver: Option<String>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Ordered chain of resolvers, run for every `SearchStep` in a plan.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn FieldResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn FieldResolver>) -> &mut Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn resolvers(&self) -> &[Arc<dyn FieldResolver>] {
        &self.resolvers
    }

    /// Runs resolvers in registration order. A resolver that declines
    /// (`supports` false) is skipped silently; one that finds nothing moves
    /// on to the next; one that errors contributes a warning diagnostic and
    /// the chain continues. The first `Resolved` outcome wins — later
    /// resolvers never overwrite an earlier hit.
    pub async fn resolve_step(&self, ctx: &ResolverContext<'_>) -> StepResolution {
        let mut diagnostics = Vec::new();

        for resolver in &self.resolvers {
            if !resolver.supports(ctx) {
                continue;
            }

            match resolver.resolve(ctx).await {
                ResolverOutcome::Resolved {
                    value,
                    confidence,
                    diagnostics: mut resolved_diagnostics,
                } => {
                    diagnostics.append(&mut resolved_diagnostics);
                    return StepResolution {
                        value: Some(value),
                        confidence,
                        resolver: Some(resolver.name().to_string()),
                        diagnostics,
                    };
                }
                ResolverOutcome::NotFound => continue,
                ResolverOutcome::Failed { message } => {
                    diagnostics.push(ParseDiagnostic::for_field(
                        ctx.step.target_key.clone(),
                        Stage::Extractor,
                        Severity::Warning,
                        format!("resolver '{}' failed: {}", resolver.name(), message),
                    ));
                    continue;
                }
            }
        }

        StepResolution {
            value: None,
            confidence: 0.0,
            resolver: None,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanComplexity, PlanId, PlanMetadata, PlanOrigin, PlanStrategy, ValidationType};

    struct AlwaysResolves(&'static str, serde_json::Value);

    #[async_trait]
    impl FieldResolver for AlwaysResolves {
        fn name(&self) -> &str {
            self.0
        }
        async fn resolve(&self, _ctx: &ResolverContext<'_>) -> ResolverOutcome {
            ResolverOutcome::Resolved {
                value: self.1.clone(),
                confidence: 0.9,
                diagnostics: Vec::new(),
            }
        }
    }

    struct NeverResolves(&'static str);

    #[async_trait]
    impl FieldResolver for NeverResolves {
        fn name(&self) -> &str {
            self.0
        }
        async fn resolve(&self, _ctx: &ResolverContext<'_>) -> ResolverOutcome {
            ResolverOutcome::NotFound
        }
    }

    struct AlwaysFails(&'static str);

    #[async_trait]
    impl FieldResolver for AlwaysFails {
        fn name(&self) -> &str {
            self.0
        }
        async fn resolve(&self, _ctx: &ResolverContext<'_>) -> ResolverOutcome {
            ResolverOutcome::Failed {
                message: "boom".to_string(),
            }
        }
    }

    fn sample_plan() -> SearchPlan {
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

    fn sample_step() -> SearchStep {
        SearchStep {
            target_key: "email".to_string(),
            description: "email address".to_string(),
            search_instruction: "find the email".to_string(),
            validation_type: ValidationType::Email,
            is_required: true,
        }
    }

    #[tokio::test]
    async fn first_match_wins() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(NeverResolves("none")));
        registry.register(Arc::new(AlwaysResolves("hit", serde_json::json!("a@b.com"))));
        registry.register(Arc::new(AlwaysResolves("second", serde_json::json!("z@z.com"))));

        let schema = indexmap::IndexMap::new();
        let plan = sample_plan();
        let step = sample_step();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();

        let ctx = ResolverContext {
            input_data: "a@b.com",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: None,
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let result = registry.resolve_step(&ctx).await;
        assert_eq!(result.resolver.as_deref(), Some("hit"));
        assert_eq!(result.value, Some(serde_json::json!("a@b.com")));
    }

    #[tokio::test]
    async fn failures_become_diagnostics_and_chain_continues() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(AlwaysFails("broken")));
        registry.register(Arc::new(AlwaysResolves("fallback", serde_json::json!("x"))));

        let schema = indexmap::IndexMap::new();
        let plan = sample_plan();
        let step = sample_step();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();

        let ctx = ResolverContext {
            input_data: "x",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: None,
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let result = registry.resolve_step(&ctx).await;
        assert_eq!(result.resolver.as_deref(), Some("fallback"));
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn no_match_returns_empty_resolution() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(NeverResolves("none")));

        let schema = indexmap::IndexMap::new();
        let plan = sample_plan();
        let step = sample_step();
        let options = ParseOptions::default();
        let shared = SharedParseState::new();

        let ctx = ResolverContext {
            input_data: "x",
            step: &step,
            schema: &schema,
            instructions: None,
            plan: &plan,
            options: &options,
            shared: &shared,
            llm_field_client: None,
            request_id: RequestId::new(),
            session_id: None,
            profile: None,
        };

        let result = registry.resolve_step(&ctx).await;
        assert!(result.value.is_none());
        assert!(result.resolver.is_none());
    }
}
