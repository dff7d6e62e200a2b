//! Request entry point: route, execute, fuse, synthesize.

use crate::error::{OrchestrationError, ValidationError};
use crate::executor::{ChainExecutor, ExecutionReport};
use crate::feedback::{FeedbackSink, Rating};
use crate::fusion::EvidenceFuser;
use crate::plan::Plan;
use crate::registry::ToolRegistry;
use crate::router::QueryRouter;
use crate::synthesizer::{Answer, AnswerSynthesizer, StepSummary};
use crate::types::Query;
use compass_core::config::FallbackPolicy;
use compass_core::OrchestrationConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Answers questions over the registered tools.
///
/// Each request is independent: the only shared state is the read-only
/// registry snapshot and the append-only feedback sink.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    router: QueryRouter,
    executor: ChainExecutor,
    fuser: EvidenceFuser,
    synthesizer: AnswerSynthesizer,
    feedback: Arc<dyn FeedbackSink>,
    fallback_policy: FallbackPolicy,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestrationConfig,
        registry: Arc<ToolRegistry>,
        synthesizer: AnswerSynthesizer,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            registry,
            router: QueryRouter::new(config),
            executor: ChainExecutor::from_config(config),
            fuser: EvidenceFuser::default(),
            synthesizer,
            feedback,
            fallback_policy: config.fallback_policy,
        }
    }

    pub fn with_router(mut self, router: QueryRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_fuser(mut self, fuser: EvidenceFuser) -> Self {
        self.fuser = fuser;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn feedback(&self) -> Arc<dyn FeedbackSink> {
        Arc::clone(&self.feedback)
    }

    /// Route without executing.
    pub fn plan(&self, query: &Query) -> Result<Plan, ValidationError> {
        self.router.route(query, &self.registry)
    }

    /// Answer `query`.
    ///
    /// Only validation failures and cancellation surface as errors; every
    /// other outcome, including total retrieval failure, is an [`Answer`].
    pub async fn ask(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestrationError> {
        let span = tracing::info_span!("request", request_id = %query.request_id());
        async {
            tracing::info!(query = %query.text(), "Received query");
            let plan = self.plan(query)?;
            self.run(query, plan, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Answer `query` with a caller-supplied plan, validated first.
    pub async fn ask_with_plan(
        &self,
        query: &Query,
        plan: Plan,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestrationError> {
        let span = tracing::info_span!("request", request_id = %query.request_id());
        async {
            plan.validate(&self.registry, self.router.max_depth(), self.router.max_steps())?;
            self.run(query, plan, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Record a rating against an answer returned earlier.
    pub fn rate(&self, request_id: &str, rating: Rating) -> bool {
        self.feedback.record(request_id, rating)
    }

    async fn run(
        &self,
        query: &Query,
        plan: Plan,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestrationError> {
        let report = match self.executor.execute(query, &plan, &self.registry, cancel).await {
            Ok(report) => report,
            Err(OrchestrationError::PlanExecutionFailed { failures, steps }) => {
                let failed = ExecutionReport {
                    plan,
                    steps,
                    superseded: Vec::new(),
                };
                self.recover(query, failed, failures.len(), cancel).await?
            }
            Err(err) => return Err(err),
        };

        // A report without usable results comes back as the
        // insufficient-evidence answer, with every step it tried.
        let usable = report.usable_results();
        let evidence = self.fuser.fuse(&usable, query.filters().min_confidence);

        let answer = match self.synthesizer.synthesize(query, &evidence, &report, cancel).await {
            Ok(answer) => answer,
            Err(OrchestrationError::Synthesis(e)) => {
                tracing::error!(error = %e, "Answer synthesis failed");
                let steps = report.all_steps().map(StepSummary::from).collect();
                Answer::insufficient(query, report.plan.clone(), steps, report.degraded())
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            confidence = answer.confidence,
            citations = answer.citations.len(),
            degraded = answer.degraded,
            "Answered query"
        );
        self.feedback.remember(&answer);
        Ok(answer)
    }

    /// Apply the fallback policy after every step of `failed.plan` failed.
    ///
    /// When the fallback runs, its report carries the failed plan's outcomes
    /// as superseded, whether or not the fallback succeeds.
    async fn recover(
        &self,
        query: &Query,
        failed: ExecutionReport,
        failed_steps: usize,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, OrchestrationError> {
        if self.fallback_policy == FallbackPolicy::InsufficientInformation {
            tracing::warn!(failed = failed_steps, "Plan failed, answering insufficient information");
            return Ok(failed);
        }

        let excluded: Vec<String> = failed.plan.tools().into_iter().map(String::from).collect();
        let Some(fallback) = self.router.fallback_plan(query, &self.registry, &excluded) else {
            tracing::warn!("Plan failed and no other tool is available");
            return Ok(failed);
        };
        tracing::warn!(tools = ?fallback.tools(), "Plan failed, retrying with a single-tool plan");

        match self.executor.execute(query, &fallback, &self.registry, cancel).await {
            Ok(mut report) => {
                report.superseded = failed.steps;
                Ok(report)
            }
            Err(OrchestrationError::PlanExecutionFailed { failures, steps }) => {
                tracing::warn!(
                    tools = ?fallback.tools(),
                    failed = failures.len(),
                    "Fallback plan failed too"
                );
                Ok(ExecutionReport {
                    plan: fallback,
                    steps,
                    superseded: failed.steps,
                })
            }
            Err(err) => Err(err),
        }
    }
}
