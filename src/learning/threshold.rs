//! Threshold Manager (spec.md §4.10): returns the 75th percentile of
//! successful runs' scores once enough samples exist, falling back to a
//! configured default otherwise, and caches the result in-process until
//! told to recheck.

use parking_lot::RwLock;

use super::store::LearningStore;
use crate::error::Result;

const PERCENTILE: f64 = 0.75;

pub const HUMAN_LIKENESS_THRESHOLD: &str = "human_likeness";
pub const REALISM_THRESHOLD: &str = "realism";

/// Caches the two learned thresholds the Quality Orchestrator gates on,
/// recomputing them from the learning store on demand.
pub struct ThresholdManager {
    learning: LearningStore,
    min_samples: u32,
    fallbacks: std::collections::HashMap<String, f64>,
    cache: RwLock<std::collections::HashMap<String, f64>>,
}

impl ThresholdManager {
    #[must_use]
    pub fn new(learning: LearningStore, min_samples: u32, fallbacks: std::collections::HashMap<String, f64>) -> Self {
        Self {
            learning,
            min_samples,
            fallbacks,
            cache: RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn fallback_for(&self, name: &str) -> f64 {
        self.fallbacks.get(name).copied().unwrap_or(0.7)
    }

    async fn get(&self, name: &str) -> Result<f64> {
        if let Some(cached) = self.cache.read().get(name).copied() {
            return Ok(cached);
        }
        let value = self
            .learning
            .learned_threshold(name, self.fallback_for(name))
            .await?;
        self.cache.write().insert(name.to_string(), value);
        Ok(value)
    }

    pub async fn get_human_likeness_threshold(&self) -> Result<f64> {
        self.get(HUMAN_LIKENESS_THRESHOLD).await
    }

    pub async fn get_realism_threshold(&self) -> Result<f64> {
        self.get(REALISM_THRESHOLD).await
    }

    /// Recompute both thresholds from the learning store and refresh the
    /// in-process cache. Called on a schedule or on demand; the system's
    /// effective gates tighten over time as more passing samples
    /// accumulate (spec.md §4.10).
    pub async fn recheck(&self) -> Result<()> {
        for name in [HUMAN_LIKENESS_THRESHOLD, REALISM_THRESHOLD] {
            if let Some(value) = self
                .learning
                .recompute_learned_threshold(name, self.min_samples, PERCENTILE)
                .await?
            {
                self.cache.write().insert(name.to_string(), value);
            }
        }
        Ok(())
    }
}
