//! Quality evaluators and the composite orchestrator (spec.md §4.5, §4.6).
//!
//! Three evaluators score a single generated attempt independently; the
//! orchestrator combines them by the configured composite weights and
//! applies each evaluator's own pass/fail gate. Grounded on the
//! `Evaluator`/criterion shape in `other_examples`' `g_eval.rs` (named
//! criteria, per-criterion weight, threshold-gated pass/fail) and on the
//! teacher's `MultiDimensionalJudge` for the LLM-as-judge evaluator.

pub mod human_likeness;
pub mod rubric_realism;
pub mod structural_diversity;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Material passed to every evaluator for a single generated attempt.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub domain: &'a str,
    pub component: &'a str,
    pub generated_text: &'a str,
    /// Texts generated on earlier attempts in this same retry session, most
    /// recent last — used by the structural diversity evaluator.
    pub prior_attempts: &'a [String],
    /// Catalog-sourced phrases the structural diversity evaluator flags as
    /// forbidden for this template.
    pub forbidden_phrases: &'a [String],
    /// The template's declared length directive (spec.md §6), e.g.
    /// "2-3 sentences." — the catalog's `user_template`'s first non-blank
    /// line, unsubstituted.
    pub directive_text: &'a str,
}

/// One evaluator's verdict: a score in `[0, 1]`, whether it passed its own
/// gate, and any diagnostic reasons (empty on a clean pass).
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub score: f64,
    pub passed: bool,
    pub reasons: Vec<String>,
    /// Named sub-dimension scores, for evaluators that score more than one
    /// named criterion (the rubric realism evaluator's three dimensions).
    /// Empty for evaluators with only a single score.
    pub sub_scores: HashMap<String, f64>,
}

/// A single named quality dimension (spec.md §4.5).
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Stable name used as the key into `composite_weights` and as the
    /// evaluator column in the learning store.
    fn name(&self) -> &'static str;

    async fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<EvaluationOutcome>;
}

/// Result of running the full evaluator suite and combining scores.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub composite_score: f64,
    pub passed: bool,
    pub per_evaluator: HashMap<String, EvaluationOutcome>,
}

/// Runs every registered evaluator and combines their scores using the
/// configured composite weights. An attempt passes only if every
/// individual evaluator passes its own gate — the composite score alone
/// never overrides a hard evaluator failure (spec.md §4.6).
pub struct QualityOrchestrator {
    evaluators: Vec<Box<dyn Evaluator>>,
    weights: HashMap<String, f64>,
}

impl QualityOrchestrator {
    #[must_use]
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>, weights: HashMap<String, f64>) -> Self {
        Self { evaluators, weights }
    }

    /// Runs every evaluator concurrently (spec.md §4.6: "independent
    /// evaluators run in parallel"). A missing `composite_weight` is a
    /// configuration bug and aborts the whole run; any other evaluator
    /// error (a transport/provider failure) becomes that evaluator's own
    /// failing score instead of aborting its still-running siblings
    /// (spec.md §4.11).
    pub async fn run(&self, input: &EvaluationInput<'_>) -> Result<CompositeResult> {
        let futures = self.evaluators.iter().map(|evaluator| {
            let name = evaluator.name();
            async move {
                if !self.weights.contains_key(name) {
                    return Err(Error::config(format!(
                        "no composite_weight configured for evaluator '{name}'"
                    )));
                }
                let outcome = match evaluator.evaluate(input).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(evaluator = name, error = %err, "evaluator failed; recording a failing score");
                        EvaluationOutcome {
                            score: 0.0,
                            passed: false,
                            reasons: vec![format!("evaluator error: {err}")],
                            sub_scores: HashMap::new(),
                        }
                    }
                };
                Ok((name.to_string(), outcome))
            }
        });

        let mut per_evaluator = HashMap::new();
        for result in futures::future::join_all(futures).await {
            let (name, outcome) = result?;
            per_evaluator.insert(name, outcome);
        }

        let mut composite_score = 0.0;
        for (name, outcome) in &per_evaluator {
            let weight = self.weights.get(name).copied().unwrap_or(0.0);
            composite_score += weight * outcome.score;
        }

        let passed = per_evaluator.values().all(|o| o.passed);

        Ok(CompositeResult {
            composite_score,
            passed,
            per_evaluator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPass(&'static str, f64);

    #[async_trait]
    impl Evaluator for AlwaysPass {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn evaluate(&self, _input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
            Ok(EvaluationOutcome {
                score: self.1,
                passed: true,
                reasons: vec![],
                sub_scores: HashMap::new(),
            })
        }
    }

    struct AlwaysFail(&'static str);

    #[async_trait]
    impl Evaluator for AlwaysFail {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn evaluate(&self, _input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
            Ok(EvaluationOutcome {
                score: 0.2,
                passed: false,
                reasons: vec!["too short".to_string()],
                sub_scores: HashMap::new(),
            })
        }
    }

    fn input<'a>(prior: &'a [String]) -> EvaluationInput<'a> {
        EvaluationInput {
            domain: "materials",
            component: "pageDescription",
            generated_text: "some generated text",
            prior_attempts: prior,
            forbidden_phrases: &[],
            directive_text: "",
        }
    }

    struct Flaky(&'static str);

    #[async_trait]
    impl Evaluator for Flaky {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn evaluate(&self, _input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
            Err(Error::provider(self.0, "timed out"))
        }
    }

    #[tokio::test]
    async fn composite_score_is_weighted_sum() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 0.6);
        weights.insert("b".to_string(), 0.4);
        let orchestrator = QualityOrchestrator::new(
            vec![Box::new(AlwaysPass("a", 1.0)), Box::new(AlwaysPass("b", 0.5))],
            weights,
        );
        let empty = vec![];
        let result = orchestrator.run(&input(&empty)).await.unwrap();
        assert!((result.composite_score - 0.8).abs() < 1e-9);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn single_failing_evaluator_fails_the_whole_attempt() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 0.5);
        weights.insert("b".to_string(), 0.5);
        let orchestrator = QualityOrchestrator::new(
            vec![Box::new(AlwaysPass("a", 1.0)), Box::new(AlwaysFail("b"))],
            weights,
        );
        let empty = vec![];
        let result = orchestrator.run(&input(&empty)).await.unwrap();
        assert!(!result.passed);
        assert!(!result.per_evaluator["b"].reasons.is_empty());
    }

    #[tokio::test]
    async fn missing_weight_for_registered_evaluator_is_configuration_error() {
        let weights = HashMap::new();
        let orchestrator = QualityOrchestrator::new(vec![Box::new(AlwaysPass("a", 1.0))], weights);
        let empty = vec![];
        assert!(orchestrator.run(&input(&empty)).await.is_err());
    }

    #[tokio::test]
    async fn evaluator_transport_failure_becomes_a_failing_score_not_an_aborted_run() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 0.5);
        weights.insert("flaky".to_string(), 0.5);
        let orchestrator = QualityOrchestrator::new(
            vec![Box::new(AlwaysPass("a", 1.0)), Box::new(Flaky("flaky"))],
            weights,
        );
        let empty = vec![];
        let result = orchestrator.run(&input(&empty)).await.unwrap();
        assert!(!result.passed);
        assert!(result.per_evaluator["a"].passed);
        assert!(!result.per_evaluator["flaky"].passed);
        assert!(result.per_evaluator["flaky"].reasons[0].contains("evaluator error"));
    }
}
