//! Learning Store + Threshold Manager (spec.md §4.9, §4.10).

pub mod store;
pub mod threshold;

pub use store::{EvaluationRecord, GenerationRecord, LearningStore, RubricCriterionRecord, SweetSpotTemperature};
pub use threshold::ThresholdManager;
