//! Request-side data model: `ParseRequest`, `ParseOptions`, `SchemaDescriptor`

use super::validation::ValidationType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A schema entry descriptor. Callers may supply a bare string hint, an
/// explicit `{type, optional}` object, or an arbitrary example shape; this
/// enum preserves that duck-typed flexibility as a tagged/untagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaDescriptor {
    /// A bare string hint, e.g. `"email"`.
    Hint(String),
    /// An explicit `{type, optional}` object.
    Typed(TypedDescriptor),
    /// An arbitrary nested example shape, e.g. `{"name": "", "age": 0}`.
    Example(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedDescriptor {
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl SchemaDescriptor {
    /// The substring heuristics operate on: the descriptor's string form
    /// when present, otherwise empty.
    pub fn as_hint_str(&self) -> String {
        match self {
            Self::Hint(s) => s.clone(),
            Self::Typed(t) => t.type_hint.clone().unwrap_or_default(),
            Self::Example(_) => String::new(),
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Typed(TypedDescriptor { optional: true, .. }))
    }
}

/// Runtime options scoped to the field-fallback LLM resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeanLLMRuntimeOptions {
    pub allow_optional_fields: Option<bool>,
    pub request_strategy: Option<LeanLLMRequestStrategy>,
    pub concurrency: Option<usize>,
    pub cooldown_ms: Option<u64>,
    pub confidence_floor: Option<f64>,
    pub plan_confidence_gate: Option<f64>,
    pub max_invocations_per_parse: Option<u32>,
    pub max_tokens_per_parse: Option<u32>,
    pub max_input_characters: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeanLLMRequestStrategy {
    MissingRequired,
    SingleField,
}

impl Default for LeanLLMRequestStrategy {
    fn default() -> Self {
        Self::MissingRequired
    }
}

/// Caller-provided options for a single parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOptions {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub validate_output: Option<bool>,
    pub include_metadata: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub lean_llm: Option<LeanLLMRuntimeOptions>,
}

/// The top-level request submitted to `parse()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRequest {
    pub input_data: String,
    pub output_schema: indexmap::IndexMap<String, SchemaDescriptor>,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
}

impl ParseRequest {
    pub fn new(
        input_data: impl Into<String>,
        output_schema: indexmap::IndexMap<String, SchemaDescriptor>,
    ) -> Self {
        Self {
            input_data: input_data.into(),
            output_schema,
            instructions: None,
            options: None,
        }
    }
}

/// Type inference precedence table entry, kept as a map for heuristics
/// bookkeeping/testing rather than as a literal `match` chain everywhere.
pub type KeyTokenTable = HashMap<&'static str, ValidationType>;
