//! Multi-tool retrieval orchestration for Compass.
//!
//! A question flows through the pipeline leaf-first:
//!
//! ```text
//! Query → QueryRouter (consults ToolRegistry) → Plan
//!       → ChainExecutor (RetrieverAdapters, per-step timeout, degraded mode)
//!       → EvidenceFuser → EvidenceSet
//!       → AnswerSynthesizer → Answer with citations
//! ```
//!
//! Ratings against answers are recorded through a [`feedback::FeedbackSink`]
//! for an offline fine-tuning job. [`Orchestrator`] wires the stages together.

pub mod adapter;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod fusion;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod screening;
pub mod synthesizer;
pub mod text;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types
pub use error::{
    FailureReason, OrchestrationError, RegistryError, RetrievalError, StepFailure, ValidationError,
};
pub use executor::{ChainExecutor, ExecutionReport, SkipReason, StepOutcome, StepStatus};
pub use feedback::{FeedbackEntry, FeedbackSink, JsonlFeedbackSink, Rating};
pub use fusion::{DefaultCalibration, Evidence, EvidenceFuser, EvidenceSet, ScoreCalibration};
pub use orchestrator::Orchestrator;
pub use plan::{InputBinding, Plan, Step};
pub use registry::{OutputSchema, RecordKind, ToolDescriptor, ToolRegistry, ToolRegistryBuilder};
pub use router::{CapabilityScores, IntentScorer, KeywordScorer, QueryRouter};
pub use runtime::build_orchestrator;
pub use screening::{FlagKind, ScreeningFlag};
pub use synthesizer::{Answer, AnswerSynthesizer, Citation, StepSummary, INSUFFICIENT_EVIDENCE_TEXT};
pub use types::{
    Capability, Provenance, Query, QueryFilters, Record, RecordContent, RetrievalResult,
    RetrievalStatus, SourceType, SubQuery,
};
