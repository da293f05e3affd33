//! Structural diversity evaluator (spec.md §4.5): a pure function over the
//! generated text and the texts from earlier attempts in the same retry
//! session. No network calls, no LLM — opener repetition, forbidden
//! boilerplate phrases, and a repeated sentence-count "shape" are all
//! checked locally.

use async_trait::async_trait;

use super::{EvaluationInput, EvaluationOutcome, Evaluator};
use crate::error::Result;

pub const NAME: &str = "structural_diversity";

fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace()
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .count()
}

/// Extract a `(min, max)` sentence-count range from a directive like
/// "2-3 sentences." Returns `None` if the directive doesn't mention
/// sentences or has no parseable digits — absence of a recognized format
/// is not penalized, since directive text varies.
fn parse_sentence_range(directive: &str) -> Option<(usize, usize)> {
    let lower = directive.to_lowercase();
    if !lower.contains("sentence") {
        return None;
    }
    let digits: Vec<usize> = lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    match digits.as_slice() {
        [n] => Some((*n, *n)),
        [lo, hi, ..] => Some((*lo, *hi)),
        _ => None,
    }
}

/// Checks performed against prior attempts in the same retry session.
pub struct StructuralDiversityEvaluator {
    /// Number of leading words compared for opener repetition.
    opener_window: usize,
}

impl Default for StructuralDiversityEvaluator {
    fn default() -> Self {
        Self { opener_window: 5 }
    }
}

impl StructuralDiversityEvaluator {
    #[must_use]
    pub fn new(opener_window: usize) -> Self {
        Self { opener_window }
    }

    fn check(&self, input: &EvaluationInput<'_>) -> (f64, Vec<String>) {
        let mut reasons = Vec::new();
        let mut score: f64 = 1.0;

        let lowered = input.generated_text.to_lowercase();
        for phrase in input.forbidden_phrases {
            if lowered.contains(phrase.to_lowercase().as_str()) {
                reasons.push(format!("contains forbidden phrase '{phrase}'"));
                score -= 0.2;
            }
        }

        if let Some((lo, hi)) = parse_sentence_range(input.directive_text) {
            let count = sentence_count(input.generated_text);
            if count < lo || count > hi {
                reasons.push(format!(
                    "sentence count {count} outside declared directive range {lo}-{hi} ('{}')",
                    input.directive_text
                ));
                score -= 0.2;
            }
        }

        let opener = first_words(input.generated_text, self.opener_window);
        for prior in input.prior_attempts {
            if first_words(prior, self.opener_window) == opener && !opener.is_empty() {
                reasons.push("opener repeats a previous attempt".to_string());
                score -= 0.3;
                break;
            }
        }

        let this_count = sentence_count(input.generated_text);
        for prior in input.prior_attempts {
            if sentence_count(prior) == this_count && this_count > 0 {
                reasons.push("sentence count matches a previous attempt exactly".to_string());
                score -= 0.1;
                break;
            }
        }

        (score.max(0.0), reasons)
    }
}

#[async_trait]
impl Evaluator for StructuralDiversityEvaluator {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<EvaluationOutcome> {
        let (score, reasons) = self.check(input);
        Ok(EvaluationOutcome {
            score,
            passed: reasons.is_empty(),
            reasons,
            sub_scores: std::collections::HashMap::new(),
        })
    }
}
