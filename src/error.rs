//! Error types used throughout the orchestration core

use thiserror::Error;

/// Main error type for the Parserator orchestration core
#[derive(Error, Debug)]
pub enum ParseratorError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Architect failed: {message}")]
    ArchitectFailed { message: String },

    #[error("Missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("Confidence {confidence} below threshold {threshold}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("Unknown failure: {message}")]
    UnknownFailure { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("LLM client error: {message}")]
    Llm { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration key: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: std::path::PathBuf },

    #[error("Failed to read configuration: {source}")]
    ReadError {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration: {source}")]
    WriteError {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError {
        #[source]
        source: toml::ser::Error,
    },
}

impl ParseratorError {
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn architect_failed<S: Into<String>>(message: S) -> Self {
        Self::ArchitectFailed {
            message: message.into(),
        }
    }

    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn llm<S: Into<String>>(message: S) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::UnknownFailure {
            message: message.into(),
        }
    }

    /// Stable error code used in `ParseError.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::ArchitectFailed { .. } => "ARCHITECT_FAILED",
            Self::MissingRequiredFields { .. } => "MISSING_REQUIRED_FIELDS",
            Self::LowConfidence { .. } => "LOW_CONFIDENCE",
            Self::UnknownFailure { .. } => "UNKNOWN_FAILURE",
            Self::Cache { .. } => "CACHE_ERROR",
            Self::Llm { .. } => "LLM_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Regex(_) => "REGEX_ERROR",
        }
    }

    /// Category used for telemetry/logging grouping.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "validation",
            Self::ArchitectFailed { .. } => "architect",
            Self::MissingRequiredFields { .. } => "extractor",
            Self::LowConfidence { .. } => "postprocess",
            Self::UnknownFailure { .. } => "orchestration",
            Self::Cache { .. } => "cache",
            Self::Llm { .. } => "llm",
            Self::Config(_) => "config",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Regex(_) => "regex",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidRequest { .. } => false,
            Self::ArchitectFailed { .. } => true,
            Self::MissingRequiredFields { .. } => true,
            Self::LowConfidence { .. } => true,
            Self::Http(_) => true,
            _ => false,
        }
    }
}

/// The result type used throughout the orchestration core.
pub type Result<T> = std::result::Result<T, ParseratorError>;
