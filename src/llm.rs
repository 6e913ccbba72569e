//! Injected LLM collaborator contracts.
//!
//! Only the contracts are defined here — wire protocols to real providers
//! are an external collaborator's concern, so no concrete HTTP-backed
//! client ships in this crate.

use crate::types::{ParseDiagnostic, RequestId, SchemaDescriptor, SearchPlan, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shared request context threaded through both LLM contracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeanLLMContext {
    pub profile: Option<String>,
    pub request_id: Option<RequestId>,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanLLMUsage {
    pub tokens_used: Option<u32>,
    pub latency_ms: Option<u64>,
    pub model: Option<String>,
}

/// `LeanLLMPlanClient.rewrite` — the Architect's optional hybrid
/// escalation. Must be idempotent with respect to `requestId`.
#[async_trait]
pub trait LeanLLMPlanClient: Send + Sync {
    async fn rewrite(&self, request: PlanRewriteRequest) -> Result<PlanRewriteResponse, String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRewriteRequest {
    pub input_data: String,
    pub output_schema: indexmap::IndexMap<String, SchemaDescriptor>,
    pub instructions: Option<String>,
    pub heuristic_plan: SearchPlan,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub context: LeanLLMContext,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRewriteResponse {
    pub plan: Option<SearchPlan>,
    pub confidence: Option<f64>,
    pub diagnostics: Option<Vec<ParseDiagnostic>>,
    pub usage: Option<LeanLLMUsage>,
    pub raw: Option<serde_json::Value>,
}

/// `LeanLLMFieldClient.resolve` — the field-level fallback resolver's
/// escape hatch.
#[async_trait]
pub trait LeanLLMFieldClient: Send + Sync {
    async fn resolve(&self, request: FieldResolveRequest) -> Result<FieldResolveResponse, String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldResolveRequest {
    pub input_data: String,
    pub output_schema: indexmap::IndexMap<String, SchemaDescriptor>,
    pub instructions: Option<String>,
    pub plan: SearchPlan,
    pub pending_fields: Vec<String>,
    pub context: LeanLLMContext,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldResolveResponse {
    pub values: Option<HashMap<String, serde_json::Value>>,
    pub confidences: Option<HashMap<String, f64>>,
    pub confidence: Option<f64>,
    pub diagnostics: Option<Vec<ParseDiagnostic>>,
    pub field_diagnostics: Option<HashMap<String, Vec<ParseDiagnostic>>>,
    pub usage: Option<LeanLLMUsage>,
    /// Sibling fields the model resolved incidentally while working on the
    /// primary field.
    pub shared_extractions: Option<HashMap<String, serde_json::Value>>,
}

/// A no-op plan client for heuristic-only configurations and tests.
pub struct NoopPlanClient;

#[async_trait]
impl LeanLLMPlanClient for NoopPlanClient {
    async fn rewrite(&self, _request: PlanRewriteRequest) -> Result<PlanRewriteResponse, String> {
        Ok(PlanRewriteResponse::default())
    }
}

/// A no-op field client for heuristic-only configurations and tests.
pub struct NoopFieldClient;

#[async_trait]
impl LeanLLMFieldClient for NoopFieldClient {
    async fn resolve(&self, _request: FieldResolveRequest) -> Result<FieldResolveResponse, String> {
        Ok(FieldResolveResponse::default())
    }
}
