//! Parameter Calculator (spec.md §4.3): maps operator-facing 1-10 intensity
//! sliders to a complete, validated generation parameter bundle.
//!
//! The algorithm is a straight-line pipeline — slider mapping, author
//! offset, learned-sweet-spot blend, attempt adaptation, bounded
//! exploration noise — with eager validation at the end so an
//! out-of-range value anywhere fails the whole call instead of silently
//! clamping. Grounded in shape on the teacher's config-driven parameter
//! plumbing (`dashflow-evals`'s scoring functions take every knob
//! explicitly, never defaulting from a global).

use rand::Rng;

use crate::error::{Error, Result};
use crate::learning::LearningStore;

/// Number of distinct stylistic axes tracked per generation.
pub const VOICE_VECTOR_LEN: usize = 8;

/// The eight tracked stylistic axes, each a value in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceVector {
    pub trait_frequency: f64,
    pub opinion_rate: f64,
    pub reader_address_rate: f64,
    pub colloquialism_frequency: f64,
    pub structural_predictability: f64,
    pub emotional_tone: f64,
    pub imperfection_tolerance: f64,
    pub sentence_rhythm_variation: f64,
}

impl VoiceVector {
    #[must_use]
    pub fn uniform(value: f64) -> Self {
        Self {
            trait_frequency: value,
            opinion_rate: value,
            reader_address_rate: value,
            colloquialism_frequency: value,
            structural_predictability: value,
            emotional_tone: value,
            imperfection_tolerance: value,
            sentence_rhythm_variation: value,
        }
    }

    fn as_array(&self) -> [f64; VOICE_VECTOR_LEN] {
        [
            self.trait_frequency,
            self.opinion_rate,
            self.reader_address_rate,
            self.colloquialism_frequency,
            self.structural_predictability,
            self.emotional_tone,
            self.imperfection_tolerance,
            self.sentence_rhythm_variation,
        ]
    }

    fn validate(&self) -> Result<()> {
        for v in self.as_array() {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::validation(format!(
                    "voice vector component out of [0,1]: {v}"
                )));
            }
        }
        Ok(())
    }

    /// Serialize to the `voice_vector_json` learning-store column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "trait_frequency": self.trait_frequency,
            "opinion_rate": self.opinion_rate,
            "reader_address_rate": self.reader_address_rate,
            "colloquialism_frequency": self.colloquialism_frequency,
            "structural_predictability": self.structural_predictability,
            "emotional_tone": self.emotional_tone,
            "imperfection_tolerance": self.imperfection_tolerance,
            "sentence_rhythm_variation": self.sentence_rhythm_variation,
        })
    }
}

/// How incidental facts are woven into the generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactFormat {
    /// Facts folded into sentences as they occur.
    Inline,
    /// Facts set off in parenthetical asides.
    Parenthetical,
    /// Facts grouped into a short aside paragraph.
    Sidebar,
}

/// Knobs controlling incidental richness of the generated text: three
/// small-integer levels (1-3) plus how facts are formatted into prose
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentParams {
    pub anecdote_level: u8,
    pub sensory_detail_level: u8,
    pub specificity_level: u8,
    pub fact_format: FactFormat,
}

impl EnrichmentParams {
    fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("anecdote_level", self.anecdote_level),
            ("sensory_detail_level", self.sensory_detail_level),
            ("specificity_level", self.specificity_level),
        ] {
            if !(1..=3).contains(&v) {
                return Err(Error::validation(format!(
                    "enrichment knob '{name}' out of {{1,2,3}}: {v}"
                )));
            }
        }
        Ok(())
    }

    /// Serialize to the `enrichment_json` learning-store column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let fact_format = match self.fact_format {
            FactFormat::Inline => "inline",
            FactFormat::Parenthetical => "parenthetical",
            FactFormat::Sidebar => "sidebar",
        };
        serde_json::json!({
            "anecdote_level": self.anecdote_level,
            "sensory_detail_level": self.sensory_detail_level,
            "specificity_level": self.specificity_level,
            "fact_format": fact_format,
        })
    }
}

/// Quality floors the generated text must satisfy downstream: the
/// human-likeness and realism gate thresholds plus a readability band
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationThresholds {
    pub human_likeness_threshold: f64,
    pub realism_minimum: f64,
    pub min_readability: f64,
    pub max_readability: f64,
}

impl ValidationThresholds {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.human_likeness_threshold) {
            return Err(Error::validation(format!(
                "human_likeness_threshold out of [0,1]: {}",
                self.human_likeness_threshold
            )));
        }
        if !(0.0..=10.0).contains(&self.realism_minimum) {
            return Err(Error::validation(format!(
                "realism_minimum out of [0,10]: {}",
                self.realism_minimum
            )));
        }
        if self.min_readability > self.max_readability {
            return Err(Error::validation(format!(
                "invalid readability band [{}, {}]",
                self.min_readability, self.max_readability
            )));
        }
        Ok(())
    }

    /// Serialize to the `validation_json` learning-store column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "human_likeness_threshold": self.human_likeness_threshold,
            "realism_minimum": self.realism_minimum,
            "min_readability": self.min_readability,
            "max_readability": self.max_readability,
        })
    }
}

/// Retry-specific knobs (spec.md §3: "max attempts, per-attempt
/// temperature delta"), snapshotted into every logged attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryParams {
    pub max_attempts: u32,
    /// Temperature delta applied on a retry whose previous failure doesn't
    /// match one of the three named adaptation cases.
    pub default_retry_delta: f64,
}

impl RetryParams {
    /// Serialize to the `retry_json` learning-store column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "max_attempts": self.max_attempts,
            "default_retry_delta": self.default_retry_delta,
        })
    }
}

/// The complete, validated, immutable parameter bundle passed to the LLM
/// client and logged verbatim to the learning store.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    pub temperature: f64,
    pub max_tokens: u32,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub voice_vector: VoiceVector,
    pub enrichment: EnrichmentParams,
    pub validation: ValidationThresholds,
    pub retry: RetryParams,
}

impl GenerationParameters {
    fn validate(&self) -> Result<()> {
        if !(0.3..=1.1).contains(&self.temperature) {
            return Err(Error::validation(format!(
                "temperature out of [0.3,1.1]: {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 || self.max_tokens > 4096 {
            return Err(Error::validation(format!(
                "max_tokens out of (0,4096]: {}",
                self.max_tokens
            )));
        }
        if !(0.0..=2.0).contains(&self.frequency_penalty) {
            return Err(Error::validation(format!(
                "frequency_penalty out of [0,2]: {}",
                self.frequency_penalty
            )));
        }
        if !(0.0..=2.0).contains(&self.presence_penalty) {
            return Err(Error::validation(format!(
                "presence_penalty out of [0,2]: {}",
                self.presence_penalty
            )));
        }
        self.voice_vector.validate()?;
        self.enrichment.validate()?;
        self.validation.validate()?;
        Ok(())
    }

    /// Serialize the whole bundle, used for the `full_params_json` and
    /// `param_hash` learning-store columns.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "frequency_penalty": self.frequency_penalty,
            "presence_penalty": self.presence_penalty,
            "voice_vector": self.voice_vector.to_json(),
            "enrichment": self.enrichment.to_json(),
            "validation": self.validation.to_json(),
            "retry": self.retry.to_json(),
        })
    }

    /// Stable hash of the full parameter bundle, used for sweet-spot
    /// dedup/drift detection (spec.md §4.9 `param_hash`).
    #[must_use]
    pub fn param_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let serialized = self.to_json().to_string();
        let digest = Sha256::digest(serialized.as_bytes());
        hex::encode(digest)
    }
}

/// The previous attempt's failure shape, used to pick an adaptation rule
/// for the next attempt (spec.md §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Human-likeness scored very low while other gates were healthy.
    UniformLowHumanLikeness,
    /// Composite score missed the pass bar only narrowly.
    Borderline,
    /// Some but not all evaluator gates passed.
    Partial,
    /// Anything else (including a transport failure with no scores).
    Other,
}

impl FailureKind {
    /// Classify a failed composite result into one of the three named
    /// adaptation cases, falling back to `Other`.
    #[must_use]
    pub fn classify(result: &crate::eval::CompositeResult) -> Self {
        if result.passed {
            return Self::Other;
        }
        let human_likeness_low = result
            .per_evaluator
            .get(crate::eval::human_likeness::NAME)
            .map(|o| o.score < 0.35)
            .unwrap_or(false);
        let others_healthy = result
            .per_evaluator
            .iter()
            .filter(|(name, _)| name.as_str() != crate::eval::human_likeness::NAME)
            .all(|(_, o)| o.passed);
        if human_likeness_low && others_healthy {
            return Self::UniformLowHumanLikeness;
        }
        let pass_count = result.per_evaluator.values().filter(|o| o.passed).count();
        if pass_count > 0 && pass_count < result.per_evaluator.len() {
            return Self::Partial;
        }
        if result.composite_score >= 0.6 {
            return Self::Borderline;
        }
        Self::Other
    }
}

/// Inputs the calculator needs beyond the sliders themselves.
pub struct ParameterRequest<'a> {
    pub component: &'a str,
    pub domain: &'a str,
    pub author_id: &'a str,
    pub attempt: u32,
    /// `None` on the first attempt; `Some` on every retry.
    pub last_failure: Option<FailureKind>,
}

/// Base slider inputs (spec.md §6): 1-10 integers controlling the overall
/// intensity of AI-detection evasion and realism behavior.
#[derive(Debug, Clone, Copy)]
pub struct Sliders {
    pub humanness_intensity: u32,
    pub realism_intensity: u32,
}

/// Maps a 1-10 slider to a penalty magnitude: flat 0.0 for 1-3, a linear
/// ramp to 0.6 for 4-7, and a linear ramp from 0.6 to 1.2 for 8-10
/// (spec.md §4.3 step 1).
fn slider_to_penalty(intensity: u32) -> f64 {
    match intensity {
        1..=3 => 0.0,
        4..=7 => {
            let t = f64::from(intensity - 4) / 3.0;
            t * 0.6
        }
        8..=10 => {
            let t = f64::from(intensity - 8) / 2.0;
            0.6 + t * 0.6
        }
        _ => 0.0,
    }
}

/// Deterministic per-author offset in `[-0.05, 0.05]`, derived from a
/// stable hash of the author id so the same author always nudges the same
/// way without needing a separate offsets config file.
fn author_temperature_offset(author_id: &str) -> f64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    author_id.hash(&mut hasher);
    let bucket = (hasher.finish() % 1000) as f64 / 1000.0;
    (bucket - 0.5) * 0.1
}

/// Produces a complete, validated `GenerationParameters` bundle for one
/// generation attempt.
pub struct ParameterCalculator<'a> {
    sliders: Sliders,
    learning: &'a LearningStore,
    exploration_probability: f64,
    max_attempts: u32,
}

impl<'a> ParameterCalculator<'a> {
    #[must_use]
    pub fn new(
        sliders: Sliders,
        learning: &'a LearningStore,
        exploration_probability: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            sliders,
            learning,
            exploration_probability,
            max_attempts,
        }
    }

    pub async fn calculate(&self, request: &ParameterRequest<'_>) -> Result<GenerationParameters> {
        // Step 1: base parameters from sliders.
        let penalty = slider_to_penalty(self.sliders.humanness_intensity);
        let mut temperature = 0.6 + (f64::from(self.sliders.realism_intensity) / 10.0) * 0.3;
        let mut frequency_penalty = penalty;
        let mut presence_penalty = penalty * 0.8;
        let voice_scale = 0.4 + (f64::from(self.sliders.realism_intensity) / 10.0) * 0.4;
        let mut voice_vector = VoiceVector::uniform(voice_scale);

        // Step 2: author-specific offset.
        temperature += author_temperature_offset(request.author_id);

        // Step 3: blend toward the learning store's sweet spot, if enough
        // qualifying samples exist.
        if let Some(sweet_spot) = self
            .learning
            .sweet_spot_temperature(request.component, request.domain, 10)
            .await?
        {
            let blend_weight = 0.5;
            temperature = temperature * (1.0 - blend_weight) + sweet_spot.temperature * blend_weight;
        }

        // Step 4: attempt-based adaptation.
        if request.attempt > 1 {
            match request.last_failure {
                Some(FailureKind::UniformLowHumanLikeness) => {
                    temperature = (temperature + 0.15).min(1.0);
                }
                Some(FailureKind::Borderline) => {
                    temperature -= 0.03;
                }
                Some(FailureKind::Partial) => {
                    temperature += 0.08;
                }
                _ => {
                    temperature += 0.1; // configured default_retry_delta, see RetryParams below
                }
            }
        }

        // Step 5: bounded exploration noise, 15% of retries.
        if request.attempt > 1 && rand::thread_rng().gen_bool(self.exploration_probability) {
            let noise: f64 = rand::thread_rng().gen_range(-0.05..=0.05);
            temperature += noise;
            voice_vector.colloquialism_frequency =
                (voice_vector.colloquialism_frequency + noise).clamp(0.0, 1.0);
        }

        frequency_penalty = frequency_penalty.clamp(0.0, 2.0);
        presence_penalty = presence_penalty.clamp(0.0, 2.0);
        temperature = temperature.clamp(0.3, 1.1);

        let enrichment_level = 1 + (voice_scale * 2.0).round() as u8;
        let params = GenerationParameters {
            temperature,
            max_tokens: 700,
            frequency_penalty,
            presence_penalty,
            voice_vector,
            enrichment: EnrichmentParams {
                anecdote_level: enrichment_level.clamp(1, 3),
                sensory_detail_level: enrichment_level.clamp(1, 3),
                specificity_level: enrichment_level.clamp(1, 3),
                fact_format: FactFormat::Inline,
            },
            validation: ValidationThresholds {
                human_likeness_threshold: 0.8,
                realism_minimum: 7.0,
                min_readability: 40.0,
                max_readability: 70.0,
            },
            retry: RetryParams {
                max_attempts: self.max_attempts,
                default_retry_delta: 0.1,
            },
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slider_penalty_is_flat_then_ramps() {
        assert_eq!(slider_to_penalty(1), 0.0);
        assert_eq!(slider_to_penalty(3), 0.0);
        assert!(slider_to_penalty(7) > 0.0 && slider_to_penalty(7) <= 0.6);
        assert!((slider_to_penalty(10) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn author_offset_is_deterministic_and_bounded() {
        let a = author_temperature_offset("7");
        let b = author_temperature_offset("7");
        assert_eq!(a, b);
        assert!(a.abs() <= 0.05);
    }

    #[test]
    fn voice_vector_rejects_out_of_range_component() {
        let mut v = VoiceVector::uniform(0.5);
        v.trait_frequency = 1.5;
        assert!(v.validate().is_err());
    }

    #[test]
    fn failure_kind_other_when_passed() {
        use crate::eval::{CompositeResult, EvaluationOutcome};
        use std::collections::HashMap;
        let mut per_evaluator = HashMap::new();
        per_evaluator.insert(
            "x".to_string(),
            EvaluationOutcome {
                score: 1.0,
                passed: true,
                reasons: vec![],
                sub_scores: HashMap::new(),
            },
        );
        let result = CompositeResult {
            composite_score: 1.0,
            passed: true,
            per_evaluator,
        };
        assert_eq!(FailureKind::classify(&result), FailureKind::Other);
    }

    #[test]
    fn failure_kind_partial_when_some_gates_pass() {
        use crate::eval::{CompositeResult, EvaluationOutcome};
        use std::collections::HashMap;
        let mut per_evaluator = HashMap::new();
        per_evaluator.insert(
            "a".to_string(),
            EvaluationOutcome {
                score: 1.0,
                passed: true,
                reasons: vec![],
                sub_scores: HashMap::new(),
            },
        );
        per_evaluator.insert(
            "b".to_string(),
            EvaluationOutcome {
                score: 0.2,
                passed: false,
                reasons: vec!["bad".to_string()],
                sub_scores: HashMap::new(),
            },
        );
        let result = CompositeResult {
            composite_score: 0.6,
            passed: false,
            per_evaluator,
        };
        assert_eq!(FailureKind::classify(&result), FailureKind::Partial);
    }
}
