//! Cascade configuration: the serializable surface consumed at construction.
//!
//! `CascadeConfig` mirrors the settings file: combination mode is given as two
//! flags (`residual`, `adaboost`) and resolved into a single
//! [`CombinationMode`] by [`CascadeConfig::validate`]. Anything that is not
//! exactly one mode, fewer than two classes, or a non-finite scale is rejected
//! before a cascade exists.

use std::path::Path;

use serde::{Deserialize, Serialize};

// ─── Error type ──────────────────────────────────────────────────────

/// Errors found while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("exactly one combination mode must be enabled (residual = {residual}, adaboost = {adaboost})")]
    CombinationMode { residual: bool, adaboost: bool },

    #[error("num_classes must be at least 2, got {0}")]
    TooFewClasses(usize),

    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f32 },

    #[error("a cascade needs at least one stage")]
    NoStages,

    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ─── Combination mode ───────────────────────────────────────────────

/// How per-stage outputs fold into the ensemble result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMode {
    /// Scaled running sum of stage outputs.
    Residual,
    /// Multi-class boosting: per-voxel sample weights and summed pseudo-residuals.
    AdaBoost,
}

impl CombinationMode {
    /// Resolve the two settings flags. Exactly one must be set.
    pub fn from_flags(residual: bool, adaboost: bool) -> Result<Self, ConfigError> {
        match (residual, adaboost) {
            (true, false) => Ok(Self::Residual),
            (false, true) => Ok(Self::AdaBoost),
            _ => Err(ConfigError::CombinationMode { residual, adaboost }),
        }
    }
}

// ─── Boosting constants ─────────────────────────────────────────────

/// Tunable constants of the boosting weight update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    /// `eta` in `exp(-eta * (C-1)/C * sum_c(target * logp))`.
    pub learning_rate: f32,
    /// Extra factor applied to each stage-transition weight. Empirical.
    pub stage_weight_scale: f32,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 2.0,
            stage_weight_scale: 1.5,
        }
    }
}

// ─── CascadeConfig ──────────────────────────────────────────────────

/// Settings of a cascade, as read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub num_classes: usize,
    /// Train all active stages jointly with full gradient flow.
    pub end_to_end: bool,
    /// Feed `softmax(accumulator)` alongside the raw input to stages after the first.
    pub auto_context: bool,
    pub residual: bool,
    pub adaboost: bool,
    /// Multiplier applied to the running sum before each residual fold.
    pub residual_scale: f32,
    /// Return one result per stage (end-to-end only).
    pub multi_output: bool,
    /// Stages with index at or below this are never reinitialized on activation.
    pub copy_previous_model_threshold: usize,
    /// Master seed for parameter resets.
    pub init_seed: u64,
    /// Inference returns only the newest stage's pseudo-residual (boosting).
    pub debug_last_stage_residual: bool,
    pub boosting: BoostingConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            end_to_end: false,
            auto_context: true,
            residual: true,
            adaboost: false,
            residual_scale: 1.0,
            multi_output: false,
            copy_previous_model_threshold: 0,
            init_seed: 0,
            debug_last_stage_residual: false,
            boosting: BoostingConfig::default(),
        }
    }
}

impl CascadeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every construction-time rule and resolve the combination mode.
    pub fn validate(&self) -> Result<CombinationMode, ConfigError> {
        let mode = CombinationMode::from_flags(self.residual, self.adaboost)?;
        if self.num_classes < 2 {
            return Err(ConfigError::TooFewClasses(self.num_classes));
        }
        for (name, value) in [
            ("residual_scale", self.residual_scale),
            ("boosting.learning_rate", self.boosting.learning_rate),
            ("boosting.stage_weight_scale", self.boosting.stage_weight_scale),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }
        Ok(mode)
    }

    /// Deterministic identity of these settings (BLAKE3 of canonical JSON).
    ///
    /// Tags reports and checkpoints so a learner collection is only reloaded
    /// into a cascade built from the same settings.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("CascadeConfig must serialize");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
