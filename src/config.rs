//! Runtime configuration: limits, defaults, and the profile table,
//! loadable from and persistable to TOML.

use crate::error::{ConfigError, Result};
use crate::types::PlanStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchitectMode {
    Heuristic,
    Hybrid,
}

/// One named operating profile ("lean-agent", "vibe-coder", "sensor-grid").
/// Profiles only override the fields they care about; anything left `None`
/// falls back to the top-level `Config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub architect_mode: Option<ArchitectMode>,
    pub min_confidence: Option<f64>,
    pub enable_field_fallbacks: Option<bool>,
    pub enable_loose_kv_resolver: Option<bool>,
    pub max_schema_fields: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hard ceiling on `ParseRequest.input_data` length; exceeding it fails
    /// with `INVALID_REQUEST`.
    pub max_input_length: usize,
    /// Hard ceiling on `ParseRequest.output_schema` field count.
    pub max_schema_fields: usize,
    /// Floor below which a resolved field is treated as unresolved for
    /// confidence-aggregation purposes.
    pub min_confidence: f64,
    pub default_strategy: PlanStrategy,
    pub enable_field_fallbacks: bool,
    pub enable_loose_kv_resolver: bool,
    pub architect_mode: ArchitectMode,
    /// Bounded-concurrency width for every `AsyncTaskQueue` the core spins
    /// up (plan rewrites, cache persistence, auto-refresh).
    pub queue_concurrency: usize,
    pub profiles: HashMap<String, ProfileConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "lean-agent".to_string(),
            ProfileConfig {
                architect_mode: Some(ArchitectMode::Heuristic),
                min_confidence: Some(0.6),
                enable_field_fallbacks: Some(true),
                enable_loose_kv_resolver: Some(false),
                max_schema_fields: Some(40),
            },
        );
        profiles.insert(
            "vibe-coder".to_string(),
            ProfileConfig {
                architect_mode: Some(ArchitectMode::Hybrid),
                min_confidence: Some(0.5),
                enable_field_fallbacks: Some(true),
                enable_loose_kv_resolver: Some(true),
                max_schema_fields: Some(80),
            },
        );
        profiles.insert(
            "sensor-grid".to_string(),
            ProfileConfig {
                architect_mode: Some(ArchitectMode::Heuristic),
                min_confidence: Some(0.75),
                enable_field_fallbacks: Some(false),
                enable_loose_kv_resolver: Some(false),
                max_schema_fields: Some(24),
            },
        );

        Self {
            max_input_length: 120_000,
            max_schema_fields: 64,
            min_confidence: 0.55,
            default_strategy: PlanStrategy::Sequential,
            enable_field_fallbacks: true,
            enable_loose_kv_resolver: false,
            architect_mode: ArchitectMode::Heuristic,
            queue_concurrency: 4,
            profiles,
        }
    }
}

impl Config {
    /// Resolves the effective settings for a named profile, falling back
    /// to the top-level defaults for anything the profile doesn't override.
    /// An unknown profile name resolves to the top-level defaults as-is.
    pub fn resolve_profile(&self, profile: Option<&str>) -> ResolvedProfile {
        let overrides = profile.and_then(|p| self.profiles.get(p));
        ResolvedProfile {
            architect_mode: overrides
                .and_then(|p| p.architect_mode.clone())
                .unwrap_or_else(|| self.architect_mode.clone()),
            min_confidence: overrides.and_then(|p| p.min_confidence).unwrap_or(self.min_confidence),
            enable_field_fallbacks: overrides
                .and_then(|p| p.enable_field_fallbacks)
                .unwrap_or(self.enable_field_fallbacks),
            enable_loose_kv_resolver: overrides
                .and_then(|p| p.enable_loose_kv_resolver)
                .unwrap_or(self.enable_loose_kv_resolver),
            max_schema_fields: overrides
                .and_then(|p| p.max_schema_fields)
                .unwrap_or(self.max_schema_fields),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub architect_mode: ArchitectMode,
    pub min_confidence: f64,
    pub enable_field_fallbacks: bool,
    pub enable_loose_kv_resolver: bool,
    pub max_schema_fields: usize,
}

/// Loads/saves a `Config` as TOML under the platform config directory.
pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let config = Config::default();
            Self::save_config(&config_path, &config)?;
            config
        };
        Ok(Self { config, config_path })
    }

    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            Config::default()
        };
        Ok(Self { config, config_path })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_path, &self.config)
    }

    pub fn reload(&mut self) -> Result<()> {
        if self.config_path.exists() {
            self.config = Self::load_config(&self.config_path)?;
        }
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::FileNotFound {
            path: PathBuf::from("config directory"),
        })?;
        let app_dir = config_dir.join("parserator");
        if !app_dir.exists() {
            fs::create_dir_all(&app_dir).map_err(|e| ConfigError::WriteError { source: e })?;
        }
        Ok(app_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError { source: e })?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { source: e })
            .map_err(Into::into)
    }

    fn save_config(path: &Path, config: &Config) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
            }
        }
        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError { source: e })?;
        fs::write(path, content).map_err(|e| ConfigError::WriteError { source: e })?;
        Ok(())
    }
}
