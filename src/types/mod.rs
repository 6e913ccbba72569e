//! The data model shared by every stage of the orchestration core.

pub mod ids;
pub mod plan;
pub mod request;
pub mod response;
pub mod validation;

pub use ids::{PlanId, RequestId, SessionId};
pub use plan::{
    DetectedSystemContext, PlanComplexity, PlanMetadata, PlanOrigin, PlanStrategy, SearchPlan,
    SearchStep,
};
pub use request::{
    LeanLLMRequestStrategy, LeanLLMRuntimeOptions, ParseOptions, ParseRequest, SchemaDescriptor,
    TypedDescriptor,
};
pub use response::{
    FallbackAction, LeanLLMFallbackUsageSummary, LeanLLMFieldUsage, ParseDiagnostic, ParseError,
    ParseMetadata, ParseResponse, Severity, Stage, StageBreakdown, StageMetrics,
};
pub use validation::ValidationType;
