//! The Architect: turns a schema + instructions into a `SearchPlan`.

pub mod heuristic;
pub mod hybrid;

pub use heuristic::{build_heuristic_plan, HeuristicArchitect};
pub use hybrid::{HybridArchitect, RewriteState};

use crate::error::Result;
use crate::types::{ParseDiagnostic, ParseRequest, RequestId, SearchPlan, SessionId};
use async_trait::async_trait;

/// Request-scoped context an `Architect` may need beyond the request body
/// itself — identifiers to stamp onto any collaborator calls it makes.
#[derive(Debug, Clone, Default)]
pub struct ArchitectContext {
    pub profile: Option<String>,
    pub request_id: Option<RequestId>,
    pub session_id: Option<SessionId>,
}

/// A plan plus the diagnostics accumulated while building it (e.g. a hybrid
/// rewrite's "applied"/"skipped"/"failed" explanation). The heuristic
/// Architect always returns an empty diagnostics list.
#[derive(Debug, Clone)]
pub struct ArchitectOutcome {
    pub plan: SearchPlan,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ArchitectOutcome {
    pub fn plain(plan: SearchPlan) -> Self {
        Self { plan, diagnostics: Vec::new() }
    }
}

#[async_trait]
pub trait Architect: Send + Sync {
    async fn build_plan(&self, request: &ParseRequest, ctx: &ArchitectContext) -> Result<ArchitectOutcome>;
}
