//! Parserator orchestration core — a schema-driven, two-stage data
//! extraction engine.
//!
//! A caller describes the shape they want (`output_schema`) and hands over
//! raw, semi-structured input; the Architect stage (heuristics, optionally
//! escalated to an injected LLM collaborator) turns that into a
//! `SearchPlan`, and the Extractor stage walks the plan through an ordered
//! chain of resolvers to produce a `ParseResponse`. `Session` layers plan
//! caching and auto-refresh on top of that; `Parserator` is the stateless
//! facade for one-shot calls.

pub mod architect;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod extractor;
pub mod heuristics;
pub mod llm;
pub mod processors;
pub mod queue;
pub mod resolvers;
pub mod session;
pub mod telemetry;
pub mod types;

pub use config::{ArchitectMode, Config, ConfigManager, ProfileConfig, ResolvedProfile};
pub use core::{Parserator, ParseratorBuilder};
pub use error::{ConfigError, ParseratorError, Result};
pub use session::{AutoRefreshConfig, Session, SessionInit, SessionSnapshot};
pub use telemetry::{ListenerHandle, TelemetryEvent, TelemetryHub};
pub use types::{
    ParseDiagnostic, ParseError, ParseMetadata, ParseOptions, ParseRequest, ParseResponse, PlanId,
    RequestId, SchemaDescriptor, SearchPlan, SessionId,
};

/// Crate version, mirrored into telemetry envelopes and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs a global `tracing` subscriber filtered by `log_level` (e.g.
/// `"info"`, `"parserator_core=debug"`). Convenience for embedders that
/// have no subscriber of their own yet; safe to skip if the host
/// application already installed one.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .map_err(|e| ParseratorError::unknown(format!("invalid log level: {e}")))?;
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ParseratorError::unknown(format!("failed to set global subscriber: {e}")))?;
    Ok(())
}
