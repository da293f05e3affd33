//! Retry-Until-Quality Loop (spec.md §4.7, §4.11) and the bounded work pool
//! that drives it across many items (spec.md §5, §4.13).
//!
//! Grounded on the teacher's `score_batch_with_concurrency`
//! (`dashflow-evals::quality_judge`): a `tokio::sync::Semaphore` bounds
//! concurrent work, fed through `futures::stream::iter(...).buffer_unordered`.
//! Here each unit of work is a whole per-item retry loop rather than a
//! single scoring call, but the concurrency primitive is identical.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::CoreContext;
use crate::domain::DomainAdapter;
use crate::error::Result;
use crate::eval::{EvaluationInput, QualityOrchestrator};
use crate::learning::store::{EvaluationRecord, GenerationRecord, RubricCriterionRecord};
use crate::llm::LlmRequest;
use crate::params::{FailureKind, ParameterCalculator, ParameterRequest, Sliders};
use crate::prompt::PromptAssembler;
use crate::voice::VoiceRegistry;

/// One `(domain, item, component)` call to make.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub domain: String,
    pub item_id: String,
    pub component: String,
    /// Overrides the generated session UUID (CLI `--session-id`).
    pub session_id: Option<String>,
}

/// The structured, user-facing result of one call (spec.md §7): `{success,
/// text, scores, attempts, best_score, reasons_if_not_passed}`.
#[derive(Debug, Clone)]
pub struct CoreResult {
    pub domain: String,
    pub item_id: String,
    pub component: String,
    pub retry_session_id: String,
    pub success: bool,
    pub text: String,
    pub best_score: f64,
    pub attempts: u32,
    pub reasons_if_not_passed: Vec<String>,
}

struct BestAttempt {
    text: String,
    composite_score: f64,
    passed: bool,
    reasons: Vec<String>,
}

/// Drives the retry-until-quality loop for one or many `(domain, item,
/// component)` calls, sharing one `CoreContext` and the collaborators every
/// attempt needs. Cheap to clone: every field is a `CoreContext` or `Arc`.
#[derive(Clone)]
pub struct RetryLoop {
    ctx: CoreContext,
    adapter: Arc<dyn DomainAdapter>,
    prompts: Arc<PromptAssembler>,
    orchestrator: Arc<QualityOrchestrator>,
    voices: Arc<VoiceRegistry>,
}

impl RetryLoop {
    #[must_use]
    pub fn new(
        ctx: CoreContext,
        adapter: Arc<dyn DomainAdapter>,
        prompts: Arc<PromptAssembler>,
        orchestrator: Arc<QualityOrchestrator>,
        voices: Arc<VoiceRegistry>,
    ) -> Self {
        Self {
            ctx,
            adapter,
            prompts,
            orchestrator,
            voices,
        }
    }

    /// Run one `(domain, item, component)` call to completion: loops until
    /// an attempt passes its gates or `max_attempts` is exhausted. Every
    /// attempt that produces text is saved and logged unconditionally
    /// (spec.md §4.7's invariant); the loop never skips a save because a
    /// key already holds content.
    pub async fn run_one(&self, request: GenerationRequest) -> Result<CoreResult> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_attempts = self.ctx.config.max_attempts;

        let item = self.adapter.get_item(&request.item_id)?;
        let author_id = self.adapter.get_author_id(&item)?;
        let author = self.voices.get(&author_id)?;

        let sliders = Sliders {
            humanness_intensity: self.ctx.config.humanness_intensity,
            realism_intensity: self.ctx.config.realism_intensity,
        };
        let calculator = ParameterCalculator::new(
            sliders,
            &self.ctx.learning,
            self.ctx.config.exploration_probability,
            max_attempts,
        );

        let mut prior_attempts: Vec<String> = Vec::new();
        let mut best: Option<BestAttempt> = None;
        let mut last_failure: Option<FailureKind> = None;
        let mut attempts_made: u32 = 0;

        for attempt in 1..=max_attempts {
            attempts_made = attempt;

            let param_request = ParameterRequest {
                component: &request.component,
                domain: &request.domain,
                author_id: &author_id,
                attempt,
                last_failure,
            };
            let params = calculator.calculate(&param_request).await?;

            let assembled = self.prompts.build(
                &request.domain,
                &request.component,
                &item,
                author,
                self.adapter.context_keys(),
            )?;

            let completion = self
                .ctx
                .llm
                .complete(LlmRequest {
                    system_prompt: assembled.system_prompt.clone(),
                    user_prompt: assembled.user_prompt.clone(),
                    temperature: params.temperature,
                    max_tokens: params.max_tokens,
                })
                .await;

            let text = match completion {
                Ok(resp) => resp.text,
                Err(err) => {
                    warn!(
                        domain = %request.domain,
                        item = %request.item_id,
                        component = %request.component,
                        session = %session_id,
                        attempt,
                        error = %err,
                        "generation attempt failed in transport; recording and continuing"
                    );
                    self.ctx
                        .learning
                        .log_generation(GenerationRecord {
                            domain: request.domain.clone(),
                            item: request.item_id.clone(),
                            component: request.component.clone(),
                            author_id: author_id.clone(),
                            retry_session_id: session_id.clone(),
                            attempt_ordinal: attempt,
                            is_retry: attempt > 1,
                            content: String::new(),
                            overall_score: 0.0,
                            passed: false,
                            params,
                        })
                        .await?;
                    last_failure = Some(FailureKind::Other);
                    continue;
                }
            };

            // Unconditional write: overwrite is mandatory, never gated on
            // "already populated" (spec.md §4.7).
            self.adapter
                .save_item(&request.item_id, &request.component, &text)?;

            let eval_input = EvaluationInput {
                domain: &request.domain,
                component: &request.component,
                generated_text: &text,
                prior_attempts: &prior_attempts,
                forbidden_phrases: &assembled.forbidden_phrases,
                directive_text: &assembled.directive_text,
            };
            let composite = self.orchestrator.run(&eval_input).await?;

            let generation_id = self
                .ctx
                .learning
                .log_generation(GenerationRecord {
                    domain: request.domain.clone(),
                    item: request.item_id.clone(),
                    component: request.component.clone(),
                    author_id: author_id.clone(),
                    retry_session_id: session_id.clone(),
                    attempt_ordinal: attempt,
                    is_retry: attempt > 1,
                    content: text.clone(),
                    overall_score: composite.composite_score,
                    passed: composite.passed,
                    params,
                })
                .await?;

            for (name, outcome) in &composite.per_evaluator {
                self.ctx
                    .learning
                    .log_evaluation(
                        generation_id,
                        EvaluationRecord {
                            evaluator_name: name.clone(),
                            score: outcome.score,
                            details_json: serde_json::json!({ "reasons": outcome.reasons }),
                        },
                    )
                    .await?;

                if !outcome.sub_scores.is_empty() {
                    let realism_threshold = self.ctx.threshold_manager.get_realism_threshold().await?;
                    let criteria = outcome
                        .sub_scores
                        .iter()
                        .map(|(key, score)| {
                            let min_score = if key == "overall_realism" {
                                realism_threshold
                            } else {
                                0.0
                            };
                            RubricCriterionRecord {
                                criterion_key: key.clone(),
                                score: *score,
                                min_score,
                                pass: *score >= min_score,
                            }
                        })
                        .collect::<Vec<_>>();
                    self.ctx
                        .learning
                        .log_rubric_criteria(generation_id, criteria)
                        .await?;
                }
            }

            let reasons: Vec<String> = composite
                .per_evaluator
                .values()
                .flat_map(|o| o.reasons.clone())
                .collect();

            let is_new_best = best
                .as_ref()
                .map(|b| composite.composite_score > b.composite_score)
                .unwrap_or(true);
            if is_new_best {
                best = Some(BestAttempt {
                    text: text.clone(),
                    composite_score: composite.composite_score,
                    passed: composite.passed,
                    reasons: reasons.clone(),
                });
            }

            info!(
                domain = %request.domain,
                item = %request.item_id,
                component = %request.component,
                session = %session_id,
                attempt,
                composite_score = composite.composite_score,
                passed = composite.passed,
                "generation attempt evaluated"
            );

            prior_attempts.push(text);

            if composite.passed {
                self.ctx.threshold_manager.recheck().await?;
                break;
            }
            last_failure = Some(FailureKind::classify(&composite));
        }

        let Some(best) = best else {
            return Ok(CoreResult {
                domain: request.domain,
                item_id: request.item_id,
                component: request.component,
                retry_session_id: session_id,
                success: false,
                text: String::new(),
                best_score: 0.0,
                attempts: attempts_made,
                reasons_if_not_passed: vec![
                    "every attempt failed before producing any generated text".to_string(),
                ],
            });
        };

        // The final write before returning is always the best-scoring
        // attempt's text, not necessarily the last attempt made (spec.md
        // §9's explicit resolution of the overwrite-vs-best-of-N tension).
        self.adapter
            .save_item(&request.item_id, &request.component, &best.text)?;

        Ok(CoreResult {
            domain: request.domain,
            item_id: request.item_id,
            component: request.component,
            retry_session_id: session_id,
            success: best.passed,
            text: best.text,
            best_score: best.composite_score,
            attempts: attempts_made,
            reasons_if_not_passed: if best.passed { vec![] } else { best.reasons },
        })
    }

    /// Run many requests with at most `concurrency` in flight at once
    /// (spec.md §5: bounded parallel item workers, single-threaded
    /// per-item retry loop). `concurrency = 1` is `--no-parallel`.
    pub async fn run_for_items(
        &self,
        requests: Vec<GenerationRequest>,
        concurrency: usize,
    ) -> Vec<Result<CoreResult>> {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        stream::iter(requests)
            .map(|request| {
                let sem = semaphore.clone();
                let loop_ = self.clone();
                async move {
                    let _permit = sem
                        .acquire()
                        .await
                        .expect("semaphore is never closed while run_many awaits it");
                    loop_.run_one(request).await
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await
    }
}
