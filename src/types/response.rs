//! Response-side data model: diagnostics, metadata, and `ParseResponse`

use super::ids::RequestId;
use super::plan::SearchPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preprocess,
    Validation,
    Architect,
    Extractor,
    Postprocess,
    Orchestration,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single per-field or per-stage diagnostic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub field: Option<String>,
    pub stage: Stage,
    pub message: String,
    pub severity: Severity,
}

impl ParseDiagnostic {
    pub fn new(stage: Stage, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            field: None,
            stage,
            message: message.into(),
            severity,
        }
    }

    pub fn for_field(
        field: impl Into<String>,
        stage: Stage,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            stage,
            message: message.into(),
            severity,
        }
    }
}

/// A terminal parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub code: String,
    pub message: String,
    pub stage: Stage,
    pub details: Option<serde_json::Value>,
    pub suggestion: Option<String>,
}

/// Per-stage timing/token/confidence/run-count rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub time_ms: u64,
    pub tokens: u32,
    pub confidence: Option<f64>,
    pub runs: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageBreakdown {
    pub preprocess: Option<StageMetrics>,
    pub architect: StageMetrics,
    pub extractor: StageMetrics,
    pub postprocess: Option<StageMetrics>,
}

/// Usage summary published by the LLM fallback resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanLLMFieldUsage {
    pub field: String,
    pub action: FallbackAction,
    pub resolved: Option<bool>,
    pub confidence: Option<f64>,
    pub tokens_used: Option<u32>,
    pub reason: Option<String>,
    pub source_field: Option<String>,
    pub shared_keys: Option<Vec<String>>,
    pub planner_confidence: Option<f64>,
    pub gate: Option<f64>,
    pub error: Option<String>,
    pub limit_type: Option<String>,
    pub limit: Option<u32>,
    pub current_invocations: Option<u32>,
    pub current_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackAction {
    Invoked,
    Reused,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanLLMFallbackUsageSummary {
    pub total_invocations: u32,
    pub resolved_fields: u32,
    pub reused_resolutions: u32,
    pub skipped_by_plan_confidence: u32,
    pub skipped_by_limits: u32,
    pub shared_extractions: u32,
    pub total_tokens: u32,
    pub plan_confidence_gate: Option<f64>,
    pub max_invocations_per_parse: Option<u32>,
    pub max_tokens_per_parse: Option<u32>,
    pub fields: Vec<LeanLLMFieldUsage>,
}

impl LeanLLMFallbackUsageSummary {
    pub fn empty() -> Self {
        Self {
            total_invocations: 0,
            resolved_fields: 0,
            reused_resolutions: 0,
            skipped_by_plan_confidence: 0,
            skipped_by_limits: 0,
            shared_extractions: 0,
            total_tokens: 0,
            plan_confidence_gate: None,
            max_invocations_per_parse: None,
            max_tokens_per_parse: None,
            fields: Vec::new(),
        }
    }

    /// Render a short human-readable "playbook" summarizing budgets,
    /// per-field status, and a suggested spawn command.
    pub fn render_playbook(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "lean-llm fallback: {} invocations, {} resolved, {} reused, {} tokens",
            self.total_invocations, self.resolved_fields, self.reused_resolutions, self.total_tokens
        ));
        if let Some(gate) = self.plan_confidence_gate {
            lines.push(format!("plan-confidence-gate: {:.2}", gate));
        }
        for field in &self.fields {
            lines.push(format!(
                "  - {}: {:?}{}",
                field.field,
                field.action,
                field
                    .reason
                    .as_ref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            ));
        }
        if self.total_invocations > 0 {
            lines.push(format!(
                "spawn: parserator resume --field-fallback --max-invocations={}",
                self.max_invocations_per_parse.unwrap_or(self.total_invocations)
            ));
        }
        lines.join("\n")
    }
}

/// Response-side plan metadata rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub architect_plan: SearchPlan,
    pub confidence: f64,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
    pub architect_tokens: u32,
    pub extractor_tokens: u32,
    pub request_id: RequestId,
    pub timestamp: DateTime<Utc>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub stage_breakdown: StageBreakdown,
    pub fallback: Option<LeanLLMFallbackUsageSummary>,
    /// Per-field confidence readout; informational only, never part of the
    /// pass/fail invariants.
    pub per_field_confidence: HashMap<String, f64>,
}

/// The top-level response returned from `parse()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResponse {
    pub success: bool,
    pub parsed_data: HashMap<String, serde_json::Value>,
    pub metadata: ParseMetadata,
    pub error: Option<ParseError>,
}

impl ParseResponse {
    pub fn assert_invariant(&self) {
        debug_assert_eq!(self.success, self.error.is_none());
    }
}
