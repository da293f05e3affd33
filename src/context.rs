//! Immutable core context threaded through every component.
//!
//! Replaces the teacher-repo-adjacent pattern of a module-level mutable
//! config singleton (spec.md §9's "cyclic object graph via shared
//! singletons" redesign flag): every constructor here takes what it needs
//! explicitly, and `CoreContext` itself is built once and never mutated.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::learning::{LearningStore, ThresholdManager};
use crate::eval::human_likeness::HumanLikenessClient;

/// Everything a single `(domain, item, component)` call needs, bundled once
/// at process start and passed by reference (or cheap `Arc` clone) from
/// there on. Nothing in this crate reaches for global/static mutable state.
#[derive(Clone)]
pub struct CoreContext {
    /// Validated configuration (spec.md §6).
    pub config: Arc<AppConfig>,
    /// LLM client abstraction used by generation and the rubric evaluator.
    pub llm: Arc<dyn LlmClient>,
    /// External AI-detection client used by the human-likeness evaluator.
    pub human_likeness: Arc<dyn HumanLikenessClient>,
    /// Learning store (SQLite-backed relational store, §4.9).
    pub learning: Arc<LearningStore>,
    /// Threshold Manager (§4.10), shared by every evaluator that gates on a
    /// learned/fallback threshold rather than a value frozen at startup.
    pub threshold_manager: Arc<ThresholdManager>,
}

impl CoreContext {
    /// Build a new context from its already-validated constituents.
    #[must_use]
    pub fn new(
        config: Arc<AppConfig>,
        llm: Arc<dyn LlmClient>,
        human_likeness: Arc<dyn HumanLikenessClient>,
        learning: Arc<LearningStore>,
        threshold_manager: Arc<ThresholdManager>,
    ) -> Self {
        Self {
            config,
            llm,
            human_likeness,
            learning,
            threshold_manager,
        }
    }
}
