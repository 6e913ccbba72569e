//! Resolver Registry and default resolvers.
//!
//! A `FieldResolver` is the unit of extraction: given one `SearchStep` and a
//! view of the shared parse state it either resolves a value, declines, or
//! fails. The `ResolverRegistry` chains resolvers in priority order, an
//! explicit, open-ended chain that lets third-party resolvers register
//! themselves rather than being fixed at compile time.

pub mod default_resolver;
pub mod json_resolver;
pub mod llm_fallback;
pub mod loose_kv_resolver;
pub mod registry;
pub mod section_resolver;

pub use default_resolver::DefaultResolver;
pub use json_resolver::JsonPathResolver;
pub use llm_fallback::{LlmFallbackResolver, LlmFallbackState, LlmFieldResolution, ResolutionSource};
pub use loose_kv_resolver::LooseKvResolver;
pub use registry::{
    FieldResolver, ResolverContext, ResolverOutcome, ResolverRegistry, SharedParseState,
    StepResolution,
};
pub use section_resolver::SectionResolver;
