//! Generation-evaluation-learning core for multi-domain content generation.
//!
//! Wires together the Domain Adapter, Prompt Assembler, Parameter Calculator,
//! LLM Client, Quality Orchestrator/Evaluators, Retry-Until-Quality Loop,
//! Persistence Layer, Learning Store, and Threshold Manager behind one
//! `CoreContext`. See each module's own doc comment for the component it
//! implements.

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod eval;
pub mod learning;
pub mod llm;
pub mod params;
pub mod persistence;
pub mod prompt;
pub mod retry;
pub mod voice;

pub use context::CoreContext;
pub use error::{Error, Result};
pub use retry::{CoreResult, GenerationRequest, RetryLoop};

use std::collections::HashMap;
use std::sync::Arc;

use domain::{DomainAdapter, DomainConfig, YamlDomainAdapter};
use eval::human_likeness::{HttpHumanLikenessClient, HumanLikenessClient, HumanLikenessEvaluator};
use eval::rubric_realism::RubricRealismEvaluator;
use eval::structural_diversity::StructuralDiversityEvaluator;
use eval::{Evaluator, QualityOrchestrator};
use llm::{detect_provider, HttpLlmClient, LlmClient};
use prompt::{PromptAssembler, PromptCatalog};
use voice::VoiceRegistry;

/// Filesystem layout a full `GenerationService` is assembled from (spec.md
/// §6): one domain config per call, plus the shared catalog/voice/learning
/// paths every domain reuses. Loaded as a single YAML document by the CLI
/// binary; library callers may also build one directly.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    pub app_config_path: std::path::PathBuf,
    pub prompt_catalog_path: std::path::PathBuf,
    pub voice_profiles_dir: std::path::PathBuf,
    pub learning_db_path: std::path::PathBuf,
    pub domains: HashMap<String, DomainConfig>,
    pub human_likeness_endpoint: String,
    pub human_likeness_api_key: Option<String>,
    pub llm_model: String,
}

impl ServiceConfig {
    /// Load a service layout document from `path`. Absolute paths are
    /// rejected the same way `AppConfig` rejects them elsewhere in the
    /// document (spec.md §6).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read service config {}: {e}", path.display())))?;
        let parsed: Self = serde_yml::from_str(&text)?;
        for (label, candidate) in [
            ("prompt_catalog_path", &parsed.prompt_catalog_path),
            ("voice_profiles_dir", &parsed.voice_profiles_dir),
            ("learning_db_path", &parsed.learning_db_path),
            ("app_config_path", &parsed.app_config_path),
        ] {
            if candidate.is_absolute() {
                return Err(Error::config(format!(
                    "{label} must be relative, got '{}'",
                    candidate.display()
                )));
            }
        }
        Ok(parsed)
    }
}

/// Everything needed to run the retry loop for any domain, assembled once
/// at process start and reused across every `(domain, item, component)`
/// call (spec.md §9: no per-call reconstruction of shared collaborators).
pub struct GenerationService {
    ctx: CoreContext,
    adapters: HashMap<String, Arc<dyn DomainAdapter>>,
    prompts: Arc<PromptAssembler>,
    voices: Arc<VoiceRegistry>,
    orchestrator: Arc<QualityOrchestrator>,
}

impl GenerationService {
    /// Build every collaborator from `service_config`: loads `AppConfig`,
    /// opens the learning store, constructs the LLM and human-likeness
    /// clients, builds one `YamlDomainAdapter` per configured domain, and
    /// assembles the three evaluators behind one `QualityOrchestrator`.
    pub async fn bootstrap(service_config: ServiceConfig) -> Result<Self> {
        let app_config = Arc::new(config::AppConfig::load(&service_config.app_config_path)?);

        let provider = detect_provider()?;
        let llm: Arc<dyn LlmClient> =
            Arc::new(HttpLlmClient::new(provider, service_config.llm_model, None)?);

        let human_likeness: Arc<dyn HumanLikenessClient> = Arc::new(HttpHumanLikenessClient::new(
            service_config.human_likeness_endpoint,
            service_config.human_likeness_api_key,
        ));

        let learning = Arc::new(learning::LearningStore::open(service_config.learning_db_path).await?);

        let threshold_manager = Arc::new(learning::ThresholdManager::new(
            (*learning).clone(),
            app_config.threshold_min_samples,
            app_config.threshold_fallbacks.clone(),
        ));

        let ctx = CoreContext::new(
            app_config.clone(),
            llm.clone(),
            human_likeness.clone(),
            learning.clone(),
            threshold_manager.clone(),
        );

        let realism_intensity = app_config.realism_intensity;

        let evaluators: Vec<Box<dyn Evaluator>> = vec![
            Box::new(HumanLikenessEvaluator::new(human_likeness, threshold_manager.clone())),
            Box::new(RubricRealismEvaluator::new(llm, realism_intensity, threshold_manager.clone())),
            Box::new(StructuralDiversityEvaluator::default()),
        ];
        let orchestrator = Arc::new(QualityOrchestrator::new(evaluators, app_config.composite_weights.clone()));

        let prompts = Arc::new(PromptAssembler::new(PromptCatalog::load(
            &service_config.prompt_catalog_path,
        )?));
        let voices = Arc::new(VoiceRegistry::load_dir(&service_config.voice_profiles_dir)?);

        let mut adapters: HashMap<String, Arc<dyn DomainAdapter>> = HashMap::new();
        for (name, domain_config) in service_config.domains {
            let adapter: Arc<dyn DomainAdapter> = Arc::new(YamlDomainAdapter::new(domain_config)?);
            adapters.insert(name, adapter);
        }

        Ok(Self {
            ctx,
            adapters,
            prompts,
            voices,
            orchestrator,
        })
    }

    /// Run the retry-until-quality loop for a single `(domain, item,
    /// component)` request.
    pub async fn generate_one(&self, request: GenerationRequest) -> Result<CoreResult> {
        let adapter = self.adapter_for(&request.domain)?;
        let retry_loop = RetryLoop::new(
            self.ctx.clone(),
            adapter,
            self.prompts.clone(),
            self.orchestrator.clone(),
            self.voices.clone(),
        );
        retry_loop.run_one(request).await
    }

    /// Run many requests with bounded concurrency; `--no-parallel` maps to
    /// `concurrency = 1`. Requests naming different domains are supported —
    /// each is dispatched against its own `DomainAdapter`, so the bound only
    /// needs one `RetryLoop` per distinct domain present in `requests`.
    pub async fn generate_many(
        &self,
        requests: Vec<GenerationRequest>,
        concurrency: usize,
    ) -> Result<Vec<Result<CoreResult>>> {
        let mut by_domain: HashMap<String, Vec<GenerationRequest>> = HashMap::new();
        for request in requests {
            by_domain.entry(request.domain.clone()).or_default().push(request);
        }

        let mut results = Vec::new();
        for (domain, domain_requests) in by_domain {
            let adapter = self.adapter_for(&domain)?;
            let retry_loop = RetryLoop::new(
                self.ctx.clone(),
                adapter,
                self.prompts.clone(),
                self.orchestrator.clone(),
                self.voices.clone(),
            );
            results.extend(retry_loop.run_for_items(domain_requests, concurrency).await);
        }
        Ok(results)
    }

    /// Every item id known to `domain`, for `--limit`-bounded CLI sweeps.
    pub fn item_ids(&self, domain: &str) -> Result<Vec<String>> {
        let adapter = self.adapter_for(domain)?;
        Ok(adapter.load_all()?.into_iter().map(|item| item.id().to_string()).collect())
    }

    fn adapter_for(&self, domain: &str) -> Result<Arc<dyn DomainAdapter>> {
        self.adapters
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::config(format!("no domain adapter configured for '{domain}'")))
    }
}
