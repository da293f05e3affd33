//! Human-likeness evaluator (spec.md §4.5): scores an attempt against an
//! external AI-detection service. The detector's raw probability is
//! normalized into a `[0, 1]` "human-likeness" score at the client
//! boundary — nothing downstream ever sees the detector's native scale.

use async_trait::async_trait;
use serde::Deserialize;

use super::{EvaluationInput, EvaluationOutcome, Evaluator};
use crate::error::{Error, Result};
use crate::learning::ThresholdManager;

/// Name used as the `composite_weights`/learning-store key for this
/// evaluator.
pub const NAME: &str = "human_likeness";

/// External AI-detection client. Implementations return the raw AI-generation
/// probability for `text`, in whatever scale their provider uses —
/// normalization to `[0, 1]` happens at the call boundary in `normalize`, not
/// in the trait implementation, so every implementor is held to the same
/// contract.
#[async_trait]
pub trait HumanLikenessClient: Send + Sync {
    /// Raw AI-generation probability for `text`, clamped to `[0, 1]` by the
    /// caller before use.
    async fn raw_ai_probability(&self, text: &str) -> Result<f64>;
}

/// Clamp and validate a raw AI-generation probability into `[0, 1]`.
fn normalize(raw: f64) -> Result<f64> {
    if !raw.is_finite() {
        return Err(Error::provider(
            "human_likeness",
            format!("detector returned non-finite probability: {raw}"),
        ));
    }
    Ok(raw.clamp(0.0, 1.0))
}

/// Wire shape of the detector's response: a 0-100 percent-human score
/// (spec.md §4.5) — not already a `[0,1]` AI probability. Normalization from
/// this wire scale into the crate's `[0,1]` convention happens in
/// `HttpHumanLikenessClient::raw_ai_probability`, the client boundary, so
/// nothing downstream ever sees the detector's native 0-100 scale.
#[derive(Debug, Deserialize)]
struct DetectResponse {
    percent_human: f64,
}

/// `reqwest`-backed detector client calling a JSON
/// `{ "percent_human": f64 }` endpoint (0-100 scale).
pub struct HttpHumanLikenessClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpHumanLikenessClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl HumanLikenessClient for HttpHumanLikenessClient {
    async fn raw_ai_probability(&self, text: &str) -> Result<f64> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::provider(
                "human_likeness",
                format!("HTTP {status}: {body}"),
            ));
        }
        let parsed: DetectResponse = resp.json().await?;
        Ok(1.0 - parsed.percent_human / 100.0)
    }
}

/// Converts a raw detector probability into a composite-ready
/// `EvaluationOutcome`, gated against a learned or fallback threshold.
pub struct HumanLikenessEvaluator {
    client: std::sync::Arc<dyn HumanLikenessClient>,
    /// Source of the minimum human-likeness score required to pass — the
    /// learning store's learned threshold, falling back to
    /// `threshold_fallbacks.human_likeness` until enough samples exist.
    threshold_manager: std::sync::Arc<ThresholdManager>,
}

impl HumanLikenessEvaluator {
    #[must_use]
    pub fn new(
        client: std::sync::Arc<dyn HumanLikenessClient>,
        threshold_manager: std::sync::Arc<ThresholdManager>,
    ) -> Self {
        Self {
            client,
            threshold_manager,
        }
    }
}

#[async_trait]
impl Evaluator for HumanLikenessEvaluator {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
        let raw = self.client.raw_ai_probability(input.generated_text).await?;
        let ai_probability = normalize(raw)?;
        let human_likeness = 1.0 - ai_probability;
        let pass_threshold = self.threshold_manager.get_human_likeness_threshold().await?;
        let passed = human_likeness >= pass_threshold;
        let reasons = if passed {
            vec![]
        } else {
            vec![format!(
                "human-likeness {human_likeness:.3} below threshold {pass_threshold:.3}"
            )]
        };
        Ok(EvaluationOutcome {
            score: human_likeness,
            passed,
            reasons,
            sub_scores: std::collections::HashMap::new(),
        })
    }
}
