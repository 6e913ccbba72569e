//! Plan-side data model: `SearchStep`, `SearchPlan`, `DetectedSystemContext`

use super::ids::PlanId;
use super::validation::ValidationType;
use serde::{Deserialize, Serialize};

/// A single field-resolution instruction emitted by the Architect.
/// Immutable once emitted: the Extractor reads but never mutates a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStep {
    pub target_key: String,
    pub description: String,
    pub search_instruction: String,
    pub validation_type: ValidationType,
    pub is_required: bool,
}

/// Execution strategy carried as plan metadata. The Extractor treats this
/// as metadata only (see DESIGN.md) and always runs steps sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    Sequential,
    Parallel,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    Heuristic,
    Model,
    Cached,
}

/// A system/domain context detected by heuristics, used to colour Architect
/// prompts and validation hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSystemContext {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub matched_fields: Vec<String>,
    pub matched_instruction_terms: Vec<String>,
    pub rationale: String,
}

/// Plan metadata, carried alongside the ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub detected_format: String,
    pub complexity: PlanComplexity,
    pub estimated_tokens: u32,
    pub origin: PlanOrigin,
    pub planner_confidence: Option<f64>,
    pub context: Option<DetectedSystemContext>,
}

/// The declarative execution plan produced by the Architect and run by the
/// Extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub id: PlanId,
    pub version: u32,
    pub steps: Vec<SearchStep>,
    pub strategy: PlanStrategy,
    pub confidence_threshold: f64,
    pub metadata: PlanMetadata,
}

impl SearchPlan {
    /// Number of steps whose field is marked required.
    pub fn required_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_required).count()
    }

    pub fn step(&self, target_key: &str) -> Option<&SearchStep> {
        self.steps.iter().find(|s| s.target_key == target_key)
    }
}
