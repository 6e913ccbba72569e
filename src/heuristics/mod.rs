//! Heuristics: pure functions for type inference, format detection,
//! section segmentation, and domain detection.

pub mod complexity;
pub mod context_detect;
pub mod format;
pub mod segment;
pub mod type_detect;

pub use complexity::{estimate_complexity, estimate_token_cost};
pub use context_detect::detect_system_context;
pub use format::{detect_format, DetectedFormat};
pub use segment::{segment_structured_text, Section};
pub use type_detect::detect_validation_type;
