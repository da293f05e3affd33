//! End-to-end scenarios straight off the seed test suite: one retry-loop
//! call driven by scripted LLM/human-likeness clients and a real, tempfile-
//! backed `YamlDomainAdapter`/`LearningStore`, so every assertion is against
//! actual file contents and actual SQLite rows rather than mocked layers.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use genforge_core::config::AppConfig;
use genforge_core::context::CoreContext;
use genforge_core::domain::{DomainAdapter, DomainConfig, YamlDomainAdapter};
use genforge_core::error::{Error, Result};
use genforge_core::eval::human_likeness::{HumanLikenessClient, HumanLikenessEvaluator};
use genforge_core::eval::rubric_realism::RubricRealismEvaluator;
use genforge_core::eval::structural_diversity::StructuralDiversityEvaluator;
use genforge_core::eval::{Evaluator, QualityOrchestrator};
use genforge_core::learning::{LearningStore, ThresholdManager};
use genforge_core::llm::{LlmClient, LlmRequest, LlmResponse};
use genforge_core::params::{FailureKind, ParameterCalculator, ParameterRequest, Sliders};
use genforge_core::prompt::{PromptAssembler, PromptCatalog};
use genforge_core::retry::{GenerationRequest, RetryLoop};
use genforge_core::voice::VoiceRegistry;

fn app_config() -> Arc<AppConfig> {
    Arc::new(
        AppConfig::parse(
            r#"
max_attempts: 5
composite_weights:
  human_likeness: 0.4
  rubric_realism: 0.4
  structural_diversity: 0.2
evaluator_timeouts_ms:
  human_likeness: 5000
  rubric_realism: 15000
  structural_diversity: 100
humanness_intensity: 5
realism_intensity: 5
exploration_probability: 0.0
threshold_min_samples: 10
threshold_fallbacks:
  human_likeness: 0.80
  realism: 0.70
field_aliases: {}
component_extraction:
  pageDescription: raw
"#,
        )
        .unwrap(),
    )
}

fn composite_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("human_likeness".to_string(), 0.4);
    weights.insert("rubric_realism".to_string(), 0.4);
    weights.insert("structural_diversity".to_string(), 0.2);
    weights
}

fn write_materials_fixture(dir: &tempfile::TempDir) -> DomainConfig {
    let path = dir.path().join("Materials.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        r#"
materials:
  aluminum:
    author_id: 3
    category: metal
    pageDescription: "old text"
  copper:
    author_id: 3
    category: metal
    pageDescription: "old copper text"
"#
    )
    .unwrap();
    DomainConfig {
        domain: "materials".to_string(),
        data_path: path,
        data_root_key: "materials".to_string(),
        context_keys: vec!["category".to_string()],
    }
}

fn voices() -> VoiceRegistry {
    VoiceRegistry::from_single(
        r#"
author_id: 3
name: "Test Author"
nationality: "Testland"
core_voice_instruction: "Write plainly and concretely."
"#,
    )
    .unwrap()
}

fn catalog() -> PromptAssembler {
    let yaml = r#"
materials/pageDescription:
  system_prompt: "You write factual material descriptions."
  user_template: |
    2-3 sentences.
    Write about {category}. {voice_instruction} {structural_pattern}
  structural_directives:
    - text: "Keep it short."
      weight: 1.0
"#;
    PromptAssembler::new(PromptCatalog::parse(yaml).unwrap())
}

/// An LLM double that serves scripted responses strictly in the order
/// given — generation calls and rubric-judge calls share one queue, so a
/// test wires them in the exact order the retry loop/evaluator will ask
/// for them.
struct ScriptedLlmQueue {
    responses: Mutex<std::collections::VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlmQueue {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmQueue {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        let text = responses
            .pop_front()
            .unwrap_or_else(|| "fallback text".to_string());
        Ok(LlmResponse {
            text,
            model: "stub".to_string(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }
}

struct ScriptedHumanLikeness {
    ai_probabilities: Mutex<std::collections::VecDeque<f64>>,
}

impl ScriptedHumanLikeness {
    fn new(ai_probabilities: Vec<f64>) -> Self {
        Self {
            ai_probabilities: Mutex::new(ai_probabilities.into_iter().collect()),
        }
    }
}

#[async_trait]
impl HumanLikenessClient for ScriptedHumanLikeness {
    async fn raw_ai_probability(&self, _text: &str) -> Result<f64> {
        Ok(self.ai_probabilities.lock().unwrap().pop_front().unwrap_or(0.1))
    }
}

async fn build_retry_loop(
    dir: &tempfile::TempDir,
    llm: Arc<dyn LlmClient>,
    human_likeness: Arc<dyn HumanLikenessClient>,
) -> (RetryLoop, Arc<LearningStore>) {
    build_retry_loop_with_config(dir, llm, human_likeness, app_config()).await
}

async fn build_retry_loop_with_config(
    dir: &tempfile::TempDir,
    llm: Arc<dyn LlmClient>,
    human_likeness: Arc<dyn HumanLikenessClient>,
    config: Arc<AppConfig>,
) -> (RetryLoop, Arc<LearningStore>) {
    let learning = Arc::new(LearningStore::open_in_memory().await.unwrap());
    let threshold_manager = Arc::new(ThresholdManager::new(
        (*learning).clone(),
        config.threshold_min_samples,
        config.threshold_fallbacks.clone(),
    ));
    let ctx = CoreContext::new(
        config,
        llm.clone(),
        human_likeness.clone(),
        learning.clone(),
        threshold_manager.clone(),
    );

    let evaluators: Vec<Box<dyn Evaluator>> = vec![
        Box::new(HumanLikenessEvaluator::new(human_likeness, threshold_manager.clone())),
        Box::new(RubricRealismEvaluator::new(llm, 5, threshold_manager.clone())),
        Box::new(StructuralDiversityEvaluator::default()),
    ];
    let orchestrator = Arc::new(QualityOrchestrator::new(evaluators, composite_weights()));

    let domain_config = write_materials_fixture(dir);
    let adapter: Arc<dyn DomainAdapter> = Arc::new(YamlDomainAdapter::new(domain_config).unwrap());

    let retry_loop = RetryLoop::new(ctx, adapter, Arc::new(catalog()), orchestrator, Arc::new(voices()));
    (retry_loop, learning)
}

fn request(item_id: &str) -> GenerationRequest {
    GenerationRequest {
        domain: "materials".to_string(),
        item_id: item_id.to_string(),
        component: "pageDescription".to_string(),
        session_id: None,
    }
}

/// Scenario 1: pass on first attempt. Detection 0.92, rubric overall 0.82,
/// structural clean (1.0) — composite ≈ 0.4·0.92 + 0.4·0.82 + 0.2·1.0 = 0.896.
#[tokio::test]
async fn pass_on_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmQueue::new(vec![
        "Aluminum resists corrosion in humid, coastal climates through a thin oxide layer.",
        r#"{"overall_realism": 8.2, "voice_authenticity": 8.2, "tonal_consistency": 8.2, "reasoning": "reads naturally"}"#,
    ]));
    let human_likeness = Arc::new(ScriptedHumanLikeness::new(vec![0.08]));
    let (retry_loop, learning) = build_retry_loop(&dir, llm, human_likeness).await;

    let result = retry_loop.run_one(request("aluminum")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts, 1);
    assert!((result.best_score - 0.896).abs() < 1e-6);

    let domain_config = DomainConfig {
        domain: "materials".to_string(),
        data_path: dir.path().join("Materials.yaml"),
        data_root_key: "materials".to_string(),
        context_keys: vec!["category".to_string()],
    };
    let adapter = YamlDomainAdapter::new(domain_config).unwrap();
    let item = adapter.get_item("aluminum").unwrap();
    assert_eq!(
        item.fields()
            .get(serde_yml::Value::from("pageDescription"))
            .and_then(serde_yml::Value::as_str),
        Some(result.text.as_str())
    );

    let recent = learning.recent_successes("pageDescription", "materials", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
}

/// Scenario 2: exhaust attempts, return best. Detection scores
/// `[0.55, 0.60, 0.72, 0.58, 0.65]`, all failing the rubric gate. Attempt 3
/// (detection 0.72) has the highest composite and must be the final save.
#[tokio::test]
async fn exhaust_attempts_returns_best_scoring_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let detection_scores = [0.55, 0.60, 0.72, 0.58, 0.65];
    let low_rubric = r#"{"overall_realism": 4.0, "voice_authenticity": 5.0, "tonal_consistency": 5.0, "reasoning": "reads generic"}"#;

    let mut responses = Vec::new();
    let texts = [
        "Attempt one describes aluminum's resistance to corrosion outdoors.",
        "Attempt two covers aluminum's lightweight structural uses in aerospace.",
        "Attempt three details aluminum's thermal conductivity in cookware designs.",
        "Attempt four discusses aluminum's recyclability in packaging industries.",
        "Attempt five explains aluminum's role in electrical transmission lines.",
    ];
    for text in texts {
        responses.push(text);
        responses.push(low_rubric);
    }
    let llm = Arc::new(ScriptedLlmQueue::new(responses));
    let human_likeness = Arc::new(ScriptedHumanLikeness::new(
        detection_scores.iter().map(|d| 1.0 - d).collect(),
    ));
    let (retry_loop, learning) = build_retry_loop(&dir, llm, human_likeness).await;

    let result = retry_loop.run_one(request("aluminum")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.attempts, 5);
    assert_eq!(result.text, texts[2]);

    let domain_config = DomainConfig {
        domain: "materials".to_string(),
        data_path: dir.path().join("Materials.yaml"),
        data_root_key: "materials".to_string(),
        context_keys: vec!["category".to_string()],
    };
    let adapter = YamlDomainAdapter::new(domain_config).unwrap();
    let item = adapter.get_item("aluminum").unwrap();
    assert_eq!(
        item.fields()
            .get(serde_yml::Value::from("pageDescription"))
            .and_then(serde_yml::Value::as_str),
        Some(texts[2])
    );

    // all 5 attempts landed in the learning store under one session.
    let recent = learning.recent_successes("pageDescription", "materials", 10).await.unwrap();
    assert!(recent.is_empty(), "none of the 5 attempts passed its gates");
}

/// Scenario 3: adaptive ramp on uniform-low-then-borderline failure, tested
/// directly against the Parameter Calculator (the component the ramp rule
/// actually lives in).
#[tokio::test]
async fn adaptive_temperature_ramp() {
    let learning = LearningStore::open_in_memory().await.unwrap();
    let sliders = Sliders {
        humanness_intensity: 5,
        realism_intensity: 8,
    };
    let calculator = ParameterCalculator::new(sliders, &learning, 0.0, 5);

    let attempt1 = calculator
        .calculate(&ParameterRequest {
            component: "pageDescription",
            domain: "materials",
            author_id: "3",
            attempt: 1,
            last_failure: None,
        })
        .await
        .unwrap();
    let baseline = attempt1.temperature;

    let attempt2 = calculator
        .calculate(&ParameterRequest {
            component: "pageDescription",
            domain: "materials",
            author_id: "3",
            attempt: 2,
            last_failure: Some(FailureKind::UniformLowHumanLikeness),
        })
        .await
        .unwrap();
    let expected2 = (baseline + 0.15).min(1.0).clamp(0.3, 1.1);
    assert!((attempt2.temperature - expected2).abs() < 1e-9);

    let attempt3 = calculator
        .calculate(&ParameterRequest {
            component: "pageDescription",
            domain: "materials",
            author_id: "3",
            attempt: 3,
            last_failure: Some(FailureKind::Borderline),
        })
        .await
        .unwrap();
    let expected3 = (attempt2.temperature - 0.03).max(0.5).clamp(0.3, 1.1);
    assert!((attempt3.temperature - expected3).abs() < 1e-9);
}

/// Scenario 4: a provider timeout on attempt 1 still counts as an attempt;
/// the loop continues and the YAML file ends up holding attempt 2's text.
#[tokio::test]
async fn provider_timeout_counts_as_an_attempt() {
    struct TimesOutThenOk {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl LlmClient for TimesOutThenOk {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            // call 0: generation attempt 1 -> times out.
            // call 1: generation attempt 2 -> succeeds.
            // call 2: rubric judge for attempt 2 -> succeeds.
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(Error::provider("llm", "request timed out")),
                1 => Ok(LlmResponse {
                    text: "Attempt two lands cleanly after the first attempt's timeout.".to_string(),
                    model: "stub".to_string(),
                    prompt_tokens: None,
                    completion_tokens: None,
                }),
                _ => Ok(LlmResponse {
                    text: r#"{"overall_realism": 8.5, "voice_authenticity": 8.0, "tonal_consistency": 8.0, "reasoning": "ok"}"#
                        .to_string(),
                    model: "stub".to_string(),
                    prompt_tokens: None,
                    completion_tokens: None,
                }),
            }
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(TimesOutThenOk {
        calls: AtomicUsize::new(0),
    });
    let human_likeness = Arc::new(ScriptedHumanLikeness::new(vec![0.1]));
    let (retry_loop, learning) = build_retry_loop(&dir, llm, human_likeness).await;

    let result = retry_loop.run_one(request("aluminum")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.text, "Attempt two lands cleanly after the first attempt's timeout.");

    let domain_config = DomainConfig {
        domain: "materials".to_string(),
        data_path: dir.path().join("Materials.yaml"),
        data_root_key: "materials".to_string(),
        context_keys: vec!["category".to_string()],
    };
    let adapter = YamlDomainAdapter::new(domain_config).unwrap();
    let item = adapter.get_item("aluminum").unwrap();
    assert_eq!(
        item.fields()
            .get(serde_yml::Value::from("pageDescription"))
            .and_then(serde_yml::Value::as_str),
        Some(result.text.as_str())
    );

    // two rows logged: the failed attempt 1 (empty content, score 0) and
    // the passing attempt 2.
    let recent = learning.recent_successes("pageDescription", "materials", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
}

/// Scenario 5: two concurrent savers targeting different items in the same
/// file must both land, with every other key left untouched.
#[tokio::test]
async fn concurrent_saves_to_different_items_both_land() {
    let dir = tempfile::tempdir().unwrap();
    let domain_config = write_materials_fixture(&dir);
    let adapter_a: Arc<dyn DomainAdapter> = Arc::new(YamlDomainAdapter::new(domain_config.clone()).unwrap());
    let adapter_b: Arc<dyn DomainAdapter> = Arc::new(YamlDomainAdapter::new(domain_config).unwrap());

    let task_a = tokio::task::spawn_blocking(move || {
        adapter_a.save_item("aluminum", "pageDescription", "A")
    });
    let task_b = tokio::task::spawn_blocking(move || {
        adapter_b.save_item("copper", "pageDescription", "B")
    });
    task_a.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();

    let verify_config = DomainConfig {
        domain: "materials".to_string(),
        data_path: dir.path().join("Materials.yaml"),
        data_root_key: "materials".to_string(),
        context_keys: vec!["category".to_string()],
    };
    let verify = YamlDomainAdapter::new(verify_config).unwrap();

    let aluminum = verify.get_item("aluminum").unwrap();
    assert_eq!(
        aluminum.fields().get(serde_yml::Value::from("pageDescription")).and_then(serde_yml::Value::as_str),
        Some("A")
    );
    assert_eq!(
        aluminum.fields().get(serde_yml::Value::from("category")).and_then(serde_yml::Value::as_str),
        Some("metal")
    );

    let copper = verify.get_item("copper").unwrap();
    assert_eq!(
        copper.fields().get(serde_yml::Value::from("pageDescription")).and_then(serde_yml::Value::as_str),
        Some("B")
    );
    assert_eq!(
        copper.fields().get(serde_yml::Value::from("category")).and_then(serde_yml::Value::as_str),
        Some("metal")
    );
}

/// Scenario 6: seeding 12 successful rows with detection scores spanning
/// `[0.82, 0.95]` and recomputing at the 75th percentile must land near
/// 0.91, and the next lookup must return that learned value rather than
/// the configured fallback of 0.80.
#[tokio::test]
async fn threshold_learning_activates_after_enough_samples() {
    let learning = LearningStore::open_in_memory().await.unwrap();

    let before = learning.learned_threshold("human_likeness", 0.80).await.unwrap();
    assert_eq!(before, 0.80);

    let scores: Vec<f64> = (0..12).map(|i| 0.82 + (i as f64) * (0.95 - 0.82) / 11.0).collect();
    for score in &scores {
        learning
            .log_generation(genforge_core::learning::store::GenerationRecord {
                domain: "materials".to_string(),
                item: "aluminum".to_string(),
                component: "pageDescription".to_string(),
                author_id: "3".to_string(),
                retry_session_id: "seed-session".to_string(),
                attempt_ordinal: 1,
                is_retry: false,
                content: "seed text".to_string(),
                overall_score: *score,
                passed: true,
                params: sample_params(),
            })
            .await
            .unwrap();
    }

    let recomputed = learning
        .recompute_learned_threshold("human_likeness", 10, 0.75)
        .await
        .unwrap()
        .unwrap();
    assert!((recomputed - 0.91).abs() < 0.02, "expected ~0.91, got {recomputed}");

    let after = learning.learned_threshold("human_likeness", 0.80).await.unwrap();
    assert_eq!(after, recomputed);
    assert_ne!(after, 0.80);
}

fn sample_params() -> genforge_core::params::GenerationParameters {
    use genforge_core::params::{
        EnrichmentParams, FactFormat, RetryParams, ValidationThresholds, VoiceVector,
    };
    genforge_core::params::GenerationParameters {
        temperature: 0.8,
        max_tokens: 700,
        frequency_penalty: 0.2,
        presence_penalty: 0.1,
        voice_vector: VoiceVector::uniform(0.5),
        enrichment: EnrichmentParams {
            anecdote_level: 2,
            sensory_detail_level: 2,
            specificity_level: 2,
            fact_format: FactFormat::Inline,
        },
        validation: ValidationThresholds {
            human_likeness_threshold: 0.8,
            realism_minimum: 7.0,
            min_readability: 40.0,
            max_readability: 70.0,
        },
        retry: RetryParams {
            max_attempts: 5,
            default_retry_delta: 0.1,
        },
    }
}
