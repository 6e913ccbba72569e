//! The Core Facade: configuration, profile resolution, and the stateless
//! `parse()` entry point.
//!
//! A stateless coordinator holding shared collaborators behind `Arc`,
//! handed out to ephemeral per-call contexts, with its own profile-
//! resolution and session-construction responsibilities.

use crate::architect::{Architect, HeuristicArchitect, HybridArchitect};
use crate::cache::PlanCache;
use crate::config::{ArchitectMode, Config};
use crate::error::{ParseratorError, Result};
use crate::extractor::Extractor;
use crate::llm::{LeanLLMFieldClient, LeanLLMPlanClient};
use crate::processors::{EmptyValuePruner, NullTokenNormalizer, ProcessorPipeline, WhitespaceNormalizer};
use crate::resolvers::{
    DefaultResolver, FieldResolver, JsonPathResolver, LlmFallbackResolver, LooseKvResolver,
    ResolverRegistry, SectionResolver,
};
use crate::session::{Session, SessionInit};
use crate::telemetry::{ListenerHandle, TelemetryEvent, TelemetryHub};
use crate::types::ParseResponse;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything the facade can have injected at construction time. All
/// fields are optional; `Parserator::new` supplies heuristic-only, no-cache
/// defaults identical to `Config::default()`.
#[derive(Default)]
pub struct ParseratorBuilder {
    config: Config,
    profile: Option<String>,
    cache: Option<Arc<dyn PlanCache>>,
    llm_plan_client: Option<Arc<dyn LeanLLMPlanClient>>,
    llm_field_client: Option<Arc<dyn LeanLLMFieldClient>>,
    extra_resolvers: Vec<Arc<dyn FieldResolver>>,
}

impl ParseratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn PlanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_llm_plan_client(mut self, client: Arc<dyn LeanLLMPlanClient>) -> Self {
        self.llm_plan_client = Some(client);
        self
    }

    pub fn with_llm_field_client(mut self, client: Arc<dyn LeanLLMFieldClient>) -> Self {
        self.llm_field_client = Some(client);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.extra_resolvers.push(resolver);
        self
    }

    pub fn build(self) -> Parserator {
        let resolved = self.config.resolve_profile(self.profile.as_deref());

        let mut registry = ResolverRegistry::new();
        if resolved.enable_loose_kv_resolver {
            registry.register(Arc::new(LooseKvResolver));
        }
        registry.register(Arc::new(JsonPathResolver));
        registry.register(Arc::new(SectionResolver));
        registry.register(Arc::new(DefaultResolver));
        for resolver in self.extra_resolvers {
            registry.register(resolver);
        }
        if resolved.enable_field_fallbacks && self.llm_field_client.is_some() {
            registry.register(Arc::new(LlmFallbackResolver));
        }

        let telemetry = TelemetryHub::new();

        let architect: Arc<dyn Architect> = match resolved.architect_mode {
            ArchitectMode::Heuristic => Arc::new(HeuristicArchitect),
            ArchitectMode::Hybrid => Arc::new(
                HybridArchitect::new(self.llm_plan_client.clone()).with_telemetry(telemetry.clone()),
            ),
        };

        let processors = ProcessorPipeline::new()
            .with_request_processor(Arc::new(WhitespaceNormalizer))
            .with_response_processor(Arc::new(WhitespaceNormalizer))
            .with_response_processor(Arc::new(NullTokenNormalizer))
            .with_response_processor(Arc::new(EmptyValuePruner));

        Parserator {
            config: self.config,
            profile: self.profile,
            architect: RwLock::new(architect),
            extractor: RwLock::new(Extractor::new(registry)),
            processors: RwLock::new(processors),
            cache: self.cache,
            telemetry,
            llm_field_client: self.llm_field_client,
        }
    }
}

/// Stateless apart from injected collaborators: the facade never caches
/// beyond configuration, and every `parse()` call is independent unless
/// the caller explicitly creates and reuses a [`Session`].
pub struct Parserator {
    config: Config,
    profile: Option<String>,
    architect: RwLock<Arc<dyn Architect>>,
    extractor: RwLock<Extractor>,
    processors: RwLock<ProcessorPipeline>,
    cache: Option<Arc<dyn PlanCache>>,
    telemetry: TelemetryHub,
    llm_field_client: Option<Arc<dyn LeanLLMFieldClient>>,
}

impl Default for Parserator {
    fn default() -> Self {
        ParseratorBuilder::new().build()
    }
}

impl Parserator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ParseratorBuilder {
        ParseratorBuilder::new()
    }

    pub fn with_config(config: Config) -> Self {
        ParseratorBuilder::new().with_config(config).build()
    }

    pub fn with_profile(profile: impl Into<String>) -> Self {
        ParseratorBuilder::new().with_profile(profile).build()
    }

    /// One-shot parse through an ephemeral session: every call builds its
    /// own plan and charges full Architect cost.
    pub async fn parse(&self, request: crate::types::ParseRequest) -> ParseResponse {
        let session = self.create_session(SessionInit {
            output_schema: request.output_schema,
            instructions: request.instructions,
            options: request.options,
            seed_input: None,
            auto_refresh: None,
            plan: None,
        });

        session.await.parse(request.input_data, None).await
    }

    /// Creates a long-lived `Session` sharing this facade's collaborators.
    pub async fn create_session(&self, init: SessionInit) -> Session {
        Session::new(
            init,
            self.architect.read().await.clone(),
            self.extractor.read().await.clone(),
            self.processors.read().await.clone(),
            self.cache.clone(),
            self.telemetry.clone(),
            self.llm_field_client.clone(),
            self.profile.clone(),
            self.config.clone(),
        )
    }

    pub async fn register_resolver(&self, resolver: Arc<dyn FieldResolver>) {
        self.extractor.write().await.registry_mut().register(resolver);
    }

    pub async fn replace_resolvers(&self, resolvers: Vec<Arc<dyn FieldResolver>>) {
        let mut registry = ResolverRegistry::new();
        for resolver in resolvers {
            registry.register(resolver);
        }
        *self.extractor.write().await = Extractor::new(registry);
    }

    pub async fn list_resolvers(&self) -> Vec<String> {
        self.extractor
            .read()
            .await
            .registry()
            .resolvers()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub async fn add_telemetry_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.telemetry.add_listener(listener).await
    }

    pub async fn set_architect(&self, architect: Arc<dyn Architect>) {
        *self.architect.write().await = architect;
    }

    pub async fn set_extractor(&self, extractor: Extractor) {
        *self.extractor.write().await = extractor;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates and swaps the active configuration. Does not rebuild the
    /// resolver chain or Architect — callers that need a profile-driven
    /// rebuild should construct a new `Parserator` via `ParseratorBuilder`.
    pub fn update_config(&mut self, config: Config) -> Result<()> {
        if config.max_schema_fields == 0 {
            return Err(ParseratorError::invalid_request("maxSchemaFields must be at least 1"));
        }
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParseRequest, SchemaDescriptor};

    fn schema(pairs: &[(&str, &str)]) -> indexmap::IndexMap<String, SchemaDescriptor> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SchemaDescriptor::Hint(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn parses_json_input_with_heuristic_architect() {
        let parserator = Parserator::new();
        let request = ParseRequest::new(
            r#"{"email":"a@b.co","count":"3"}"#,
            schema(&[("email", "email"), ("count", "number")]),
        );
        let response = parserator.parse(request).await;

        assert!(response.success);
        assert_eq!(response.parsed_data.get("email"), Some(&serde_json::json!("a@b.co")));
        assert_eq!(response.parsed_data.get("count"), Some(&serde_json::json!(3)));
        assert_eq!(response.metadata.architect_plan.metadata.origin, crate::types::PlanOrigin::Heuristic);
    }

    #[tokio::test]
    async fn parses_plain_text_contact_card() {
        let parserator = Parserator::new();
        let request = ParseRequest::new(
            "Contact: Jane Doe\nPhone: +1 555 123 4567\nEmail: j@d.co",
            schema(&[("contact_name", "name"), ("phone", "phone"), ("email", "email")]),
        );
        let response = parserator.parse(request).await;

        assert!(response.success);
        assert!(response.metadata.confidence >= 0.5);
        assert!(response.metadata.fallback.is_none());
    }

    #[tokio::test]
    async fn invalid_request_fails_before_architect_runs() {
        let parserator = Parserator::new();
        let request = ParseRequest::new("", schema(&[("email", "email")]));
        let response = parserator.parse(request).await;

        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, "INVALID_REQUEST");
        assert_eq!(response.metadata.architect_tokens, 0);
    }

    #[tokio::test]
    async fn session_reuses_plan_across_parses() {
        let parserator = Parserator::new();
        let session = parserator
            .create_session(SessionInit {
                output_schema: schema(&[("contact_name", "name"), ("phone", "phone"), ("email", "email")]),
                instructions: None,
                options: None,
                seed_input: None,
                auto_refresh: None,
                plan: None,
            })
            .await;

        let first = session
            .parse("Contact: Jane Doe\nPhone: +1 555 123 4567\nEmail: j@d.co", None)
            .await;
        let second = session.parse("Name: Bob\nPhone: 555-0100\nEmail: b@c.io", None).await;

        assert_eq!(first.metadata.architect_plan.id, second.metadata.architect_plan.id);
        assert_eq!(second.metadata.architect_tokens, 0);
        assert_eq!(second.metadata.architect_plan.metadata.origin, crate::types::PlanOrigin::Cached);
    }

    #[tokio::test]
    async fn listing_resolvers_reflects_registration_order() {
        let parserator = Parserator::new();
        let names = parserator.list_resolvers().await;
        assert_eq!(names, vec!["json-path", "section", "default-pattern"]);
    }
}
