//! Rubric realism evaluator (spec.md §4.5): LLM-as-judge quality scoring
//! across three named dimensions.
//!
//! Grounded on the teacher's `MultiDimensionalJudge` (`dashflow-evals`):
//! same shape (build a rubric'd scoring prompt, call the model at
//! temperature 0, strip markdown fences, parse the JSON contract) but
//! narrowed to the three dimensions this system cares about, and driven
//! by `crate::llm::LlmClient` instead of a concrete chat-model type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EvaluationInput, EvaluationOutcome, Evaluator};
use crate::error::{Error, Result};
use crate::learning::ThresholdManager;
use crate::llm::{LlmClient, LlmRequest};

pub const NAME: &str = "rubric_realism";

/// The three named rubric dimensions this evaluator scores. The judge
/// returns each on its native 0-10 scale (spec.md §4.5); `normalized_*`
/// divides by 10 so everything downstream of this struct deals only in
/// the crate's `[0,1]` convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricScore {
    /// How believable the text is as something a human author would write.
    pub overall_realism: f64,
    /// How closely the text matches the target author's established voice.
    pub voice_authenticity: f64,
    /// Consistency of tone across the whole text.
    pub tonal_consistency: f64,
    /// 1-3 sentence justification from the judge.
    pub reasoning: String,
}

impl RubricScore {
    fn normalized_overall(&self) -> f64 {
        self.overall_realism / 10.0
    }

    fn normalized_voice(&self) -> f64 {
        self.voice_authenticity / 10.0
    }

    fn normalized_tonal(&self) -> f64 {
        self.tonal_consistency / 10.0
    }

    fn composite(&self) -> f64 {
        (self.normalized_overall() + self.normalized_voice() + self.normalized_tonal()) / 3.0
    }
}

/// LLM-as-judge evaluator scoring Overall Realism, Voice Authenticity, and
/// Tonal Consistency, gated on the normalized Overall Realism score against
/// a learned or fallback threshold.
pub struct RubricRealismEvaluator {
    llm: std::sync::Arc<dyn LlmClient>,
    /// 1-10 slider (spec.md §6 `realism_intensity`) folded into the
    /// scoring prompt's strictness framing.
    realism_intensity: u32,
    threshold_manager: std::sync::Arc<ThresholdManager>,
}

impl RubricRealismEvaluator {
    #[must_use]
    pub fn new(
        llm: std::sync::Arc<dyn LlmClient>,
        realism_intensity: u32,
        threshold_manager: std::sync::Arc<ThresholdManager>,
    ) -> Self {
        Self {
            llm,
            realism_intensity,
            threshold_manager,
        }
    }

    fn build_prompt(&self, text: &str) -> (String, String) {
        let system_prompt = format!(
            "You are an exacting literary critic judging whether a passage of text reads \
             as authentically human-written. Apply a strictness level of {}/10 — higher \
             means less tolerance for generic or formulaic phrasing.",
            self.realism_intensity
        );
        let user_prompt = format!(
            r#"Evaluate the following passage across three dimensions, each scored 0-10:

1. OVERALL_REALISM: how believable this is as human-written prose
2. VOICE_AUTHENTICITY: how distinct and consistent the authorial voice feels
3. TONAL_CONSISTENCY: whether the tone holds steady from start to end

PASSAGE:
{text}

Respond with ONLY a JSON object, no markdown fences, no extra commentary:

{{
  "overall_realism": <score 0-10>,
  "voice_authenticity": <score 0-10>,
  "tonal_consistency": <score 0-10>,
  "reasoning": "<1-3 sentence justification>"
}}"#
        );
        (system_prompt, user_prompt)
    }

    fn parse_response(&self, raw: &str) -> Result<RubricScore> {
        let cleaned = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(cleaned)
            .map_err(|e| Error::data(format!("rubric judge returned unparseable JSON: {e}")))
    }
}

#[async_trait]
impl Evaluator for RubricRealismEvaluator {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
        let (system_prompt, user_prompt) = self.build_prompt(input.generated_text);
        let response = self
            .llm
            .complete(LlmRequest {
                system_prompt,
                user_prompt,
                temperature: 0.0,
                max_tokens: 512,
            })
            .await?;
        let rubric = self.parse_response(&response.text)?;

        let overall_realism_threshold = self.threshold_manager.get_realism_threshold().await?;
        let normalized_overall = rubric.normalized_overall();
        let passed = normalized_overall >= overall_realism_threshold;
        let reasons = if passed {
            vec![]
        } else {
            vec![format!(
                "overall_realism {normalized_overall:.3} (raw {:.1}/10) below gate {overall_realism_threshold:.2}: {}",
                rubric.overall_realism, rubric.reasoning
            )]
        };

        let mut sub_scores = std::collections::HashMap::new();
        sub_scores.insert("overall_realism".to_string(), normalized_overall);
        sub_scores.insert("voice_authenticity".to_string(), rubric.normalized_voice());
        sub_scores.insert("tonal_consistency".to_string(), rubric.normalized_tonal());

        Ok(EvaluationOutcome {
            score: rubric.composite(),
            passed,
            reasons,
            sub_scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::threshold::REALISM_THRESHOLD;
    use crate::llm::LlmResponse;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                text: self.0.to_string(),
                model: "test-model".to_string(),
                prompt_tokens: None,
                completion_tokens: None,
            })
        }
    }

    fn input() -> EvaluationInput<'static> {
        EvaluationInput {
            domain: "materials",
            component: "pageDescription",
            generated_text: "Aluminum resists corrosion in humid, coastal climates.",
            prior_attempts: &[],
            forbidden_phrases: &[],
            directive_text: "",
        }
    }

    async fn fixed_threshold_manager(value: f64) -> std::sync::Arc<ThresholdManager> {
        let learning = crate::learning::LearningStore::open_in_memory().await.unwrap();
        let mut fallbacks = std::collections::HashMap::new();
        fallbacks.insert(REALISM_THRESHOLD.to_string(), value);
        std::sync::Arc::new(ThresholdManager::new(learning, 10, fallbacks))
    }

    #[tokio::test]
    async fn high_realism_passes() {
        let llm = FixedLlm(
            r#"{"overall_realism": 9.0, "voice_authenticity": 8.5, "tonal_consistency": 8.8, "reasoning": "reads naturally"}"#,
        );
        let evaluator =
            RubricRealismEvaluator::new(std::sync::Arc::new(llm), 5, fixed_threshold_manager(0.7).await);
        let outcome = evaluator.evaluate(&input()).await.unwrap();
        assert!(outcome.passed);
        assert!(outcome.score > 0.8);
    }

    #[tokio::test]
    async fn low_overall_realism_fails_even_with_good_voice() {
        let llm = FixedLlm(
            r#"{"overall_realism": 5.0, "voice_authenticity": 9.5, "tonal_consistency": 9.5, "reasoning": "feels templated"}"#,
        );
        let evaluator =
            RubricRealismEvaluator::new(std::sync::Arc::new(llm), 5, fixed_threshold_manager(0.7).await);
        let outcome = evaluator.evaluate(&input()).await.unwrap();
        assert!(!outcome.passed);
    }

    #[tokio::test]
    async fn strips_markdown_fences_before_parsing() {
        let llm = FixedLlm(
            "```json\n{\"overall_realism\": 8.0, \"voice_authenticity\": 8.0, \"tonal_consistency\": 8.0, \"reasoning\": \"ok\"}\n```",
        );
        let evaluator =
            RubricRealismEvaluator::new(std::sync::Arc::new(llm), 5, fixed_threshold_manager(0.7).await);
        let outcome = evaluator.evaluate(&input()).await.unwrap();
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn malformed_json_is_data_error() {
        let llm = FixedLlm("not json at all");
        let evaluator =
            RubricRealismEvaluator::new(std::sync::Arc::new(llm), 5, fixed_threshold_manager(0.7).await);
        assert!(evaluator.evaluate(&input()).await.is_err());
    }
}
