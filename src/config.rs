//! Typed, eagerly-validated configuration loader for `generation/config.yaml`.
//!
//! Every key in spec.md's §6 configuration table is required here: the
//! loader raises `Error::Configuration` the instant a key is absent or a
//! value falls outside its documented range. There are no silent defaults —
//! removing the configuration file must make the first call fail fast.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Raw, on-disk shape of `generation/config.yaml`. Every field is mandatory;
/// `#[serde(default)]` never appears here on purpose.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    max_attempts: u32,
    composite_weights: HashMap<String, f64>,
    evaluator_timeouts_ms: HashMap<String, u64>,
    humanness_intensity: u32,
    realism_intensity: u32,
    exploration_probability: f64,
    threshold_min_samples: u32,
    threshold_fallbacks: HashMap<String, f64>,
    field_aliases: HashMap<String, String>,
    component_extraction: HashMap<String, ExtractionStrategy>,
}

/// Per-component text-extraction strategy (spec.md §4.1 Component Spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Use the generated text verbatim.
    Raw,
    /// Split on the first blank line; keep the "after" paragraph.
    BeforeAfter,
    /// Parse the generated text as a JSON array of strings.
    JsonList,
}

/// Validated application configuration, immutable once constructed.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Hard cap on retries per (item, component); `MAX_ATTEMPTS` in spec.md.
    pub max_attempts: u32,
    /// Evaluator name -> composite weight; must sum to ~1.0.
    pub composite_weights: HashMap<String, f64>,
    /// Evaluator name -> timeout in milliseconds.
    pub evaluator_timeouts_ms: HashMap<String, u64>,
    /// 1-10 slider driving AI-detection-evasion penalty calculation.
    pub humanness_intensity: u32,
    /// 1-10 slider driving realism-related parameters.
    pub realism_intensity: u32,
    /// Probability in `[0,1]` of adding bounded exploration noise on retries.
    pub exploration_probability: f64,
    /// Minimum qualifying samples before learned thresholds are trusted.
    pub threshold_min_samples: u32,
    /// Threshold name -> fallback value used when samples are insufficient.
    pub threshold_fallbacks: HashMap<String, f64>,
    /// CLI-alias -> canonical YAML key, used by upstream field detection.
    pub field_aliases: HashMap<String, String>,
    /// Component -> extraction strategy.
    pub component_extraction: HashMap<String, ExtractionStrategy>,
}

impl AppConfig {
    /// Load and validate configuration from a YAML file at `path`.
    ///
    /// Fails with `Error::Configuration` if the file is missing, malformed,
    /// missing a required key, or contains an out-of-range value. Absolute
    /// paths anywhere inside the document are rejected for portability.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yml::from_str(text)
            .map_err(|e| Error::config(format!("malformed config.yaml: {e}")))?;

        if !(1..=10).contains(&raw.max_attempts) {
            return Err(Error::config(format!(
                "max_attempts must be 1-10, got {}",
                raw.max_attempts
            )));
        }

        if raw.composite_weights.is_empty() {
            return Err(Error::config(
                "composite_weights must be configured explicitly; no built-in default is used",
            ));
        }
        let weight_sum: f64 = raw.composite_weights.values().sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(Error::config(format!(
                "composite_weights must sum to 1.0, got {weight_sum}"
            )));
        }
        for (name, w) in &raw.composite_weights {
            if !(0.0..=1.0).contains(w) {
                return Err(Error::config(format!(
                    "composite weight for '{name}' out of [0,1]: {w}"
                )));
            }
        }

        if !(1..=10).contains(&raw.humanness_intensity) {
            return Err(Error::config("humanness_intensity must be 1-10"));
        }
        if !(1..=10).contains(&raw.realism_intensity) {
            return Err(Error::config("realism_intensity must be 1-10"));
        }
        if !(0.0..=1.0).contains(&raw.exploration_probability) {
            return Err(Error::config("exploration_probability must be in [0,1]"));
        }
        if raw.threshold_min_samples == 0 {
            return Err(Error::config("threshold_min_samples must be >= 1"));
        }

        for (key, value) in raw
            .field_aliases
            .iter()
            .chain(std::iter::empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
        {
            reject_absolute(key)?;
            reject_absolute(value)?;
        }

        Ok(Self {
            max_attempts: raw.max_attempts,
            composite_weights: raw.composite_weights,
            evaluator_timeouts_ms: raw.evaluator_timeouts_ms,
            humanness_intensity: raw.humanness_intensity,
            realism_intensity: raw.realism_intensity,
            exploration_probability: raw.exploration_probability,
            threshold_min_samples: raw.threshold_min_samples,
            threshold_fallbacks: raw.threshold_fallbacks,
            field_aliases: raw.field_aliases,
            component_extraction: raw.component_extraction,
        })
    }

    /// Look up the extraction strategy for a component; fatal if absent
    /// (spec.md: "any missing placeholder is fatal" extends to missing
    /// strategy declarations).
    pub fn extraction_strategy(&self, component: &str) -> Result<ExtractionStrategy> {
        self.component_extraction.get(component).copied().ok_or_else(|| {
            Error::config(format!(
                "no component_extraction strategy configured for '{component}'"
            ))
        })
    }
}

fn reject_absolute(value: &str) -> Result<()> {
    if value.starts_with('/') || value.starts_with('\\') || (value.len() > 1 && value.as_bytes()[1] == b':') {
        return Err(Error::config(format!(
            "absolute paths are forbidden in configuration: '{value}'"
        )));
    }
    Ok(())
}
