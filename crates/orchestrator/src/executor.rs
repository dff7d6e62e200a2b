//! Plan execution with per-step timeouts, one retry and degraded mode.
//!
//! Steps are grouped into levels by dependency. A level's steps run
//! concurrently and the coordinating task waits for all of them before it
//! publishes their results, so nothing downstream ever sees a half-finished
//! step.

use crate::adapter::{elapsed_ms, RetrieverAdapter};
use crate::error::{FailureReason, OrchestrationError, RetrievalError, StepFailure};
use crate::plan::{InputBinding, Plan};
use crate::registry::ToolRegistry;
use crate::types::{Query, RetrievalResult, RetrievalStatus, SubQuery};
use compass_core::OrchestrationConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a step was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// The step it binds to failed or was skipped
    DependencyFailed { step: usize },
    /// The step it binds to succeeded without producing any value to bind
    NoUpstreamValues { step: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepStatus {
    Ok,
    Partial,
    Failed { reason: FailureReason, message: String },
    Skipped { reason: SkipReason },
}

impl StepStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Partial)
    }
}

/// Outcome of one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub index: usize,
    pub tool: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RetrievalResult>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_query: Option<SubQuery>,
    pub latency_ms: u64,
    pub optional: bool,
}

/// Per-step outcomes of a completed plan, in step order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub plan: Plan,
    pub steps: Vec<StepOutcome>,
    /// Outcomes of an earlier plan that failed and was replaced by this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<StepOutcome>,
}

impl ExecutionReport {
    pub fn usable_results(&self) -> Vec<&RetrievalResult> {
        self.steps
            .iter()
            .filter(|s| s.status.is_usable())
            .filter_map(|s| s.result.as_ref())
            .collect()
    }

    pub fn failures(&self) -> Vec<StepFailure> {
        self.steps.iter().filter_map(step_failure).collect()
    }

    /// A required step failed or was skipped, or the plan is a fallback.
    pub fn degraded(&self) -> bool {
        !self.superseded.is_empty()
            || self
                .steps
                .iter()
                .any(|s| !s.optional && !s.status.is_usable())
    }

    /// Superseded outcomes followed by this plan's outcomes.
    pub fn all_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.superseded.iter().chain(self.steps.iter())
    }
}

fn step_failure(outcome: &StepOutcome) -> Option<StepFailure> {
    match &outcome.status {
        StepStatus::Failed { reason, message } => Some(StepFailure {
            step: outcome.index,
            tool: outcome.tool.clone(),
            reason: *reason,
            message: message.clone(),
            attempts: outcome.attempts,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ChainExecutor {
    step_timeout: Duration,
    retry_backoff: Duration,
}

impl ChainExecutor {
    pub fn new(step_timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            step_timeout,
            retry_backoff,
        }
    }

    pub fn from_config(config: &OrchestrationConfig) -> Self {
        Self::new(
            Duration::from_millis(config.step_timeout_ms),
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Run a validated plan.
    ///
    /// Step failures are recorded on their outcome. The call itself fails
    /// only when the request is cancelled or no step produced a usable
    /// result.
    pub async fn execute(
        &self,
        query: &Query,
        plan: &Plan,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, OrchestrationError> {
        let mut outcomes: Vec<Option<StepOutcome>> = vec![None; plan.steps.len()];

        for level in levels(plan) {
            if cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled);
            }

            let mut pending = Vec::new();
            for index in level {
                let step = &plan.steps[index];
                match self.prepare(index, plan, query, &outcomes) {
                    Ok(sub_query) => {
                        let adapter = registry.adapter(&step.tool);
                        pending.push(self.run_step(
                            index,
                            step.tool.clone(),
                            step.optional,
                            adapter,
                            sub_query,
                            cancel,
                        ));
                    }
                    Err(reason) => {
                        tracing::warn!(
                            step = index,
                            tool = %step.tool,
                            reason = ?reason,
                            "Skipping step"
                        );
                        outcomes[index] = Some(StepOutcome {
                            index,
                            tool: step.tool.clone(),
                            status: StepStatus::Skipped { reason },
                            result: None,
                            attempts: 0,
                            sub_query: None,
                            latency_ms: 0,
                            optional: step.optional,
                        });
                    }
                }
            }

            for outcome in futures::future::join_all(pending).await {
                let index = outcome.index;
                outcomes[index] = Some(outcome);
            }

            if cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled);
            }
        }

        let steps: Vec<StepOutcome> = outcomes.into_iter().flatten().collect();
        let report = ExecutionReport {
            plan: plan.clone(),
            steps,
            superseded: Vec::new(),
        };

        if report.usable_results().is_empty() {
            let failures = report.failures();
            tracing::warn!(
                request_id = %query.request_id(),
                failed = failures.len(),
                "No step produced evidence"
            );
            return Err(OrchestrationError::PlanExecutionFailed {
                failures,
                steps: report.steps,
            });
        }

        if report.degraded() {
            tracing::warn!(request_id = %query.request_id(), "Plan completed in degraded mode");
        }
        Ok(report)
    }

    /// Build the sub-query for a step, or the reason it cannot run.
    fn prepare(
        &self,
        index: usize,
        plan: &Plan,
        query: &Query,
        outcomes: &[Option<StepOutcome>],
    ) -> Result<SubQuery, SkipReason> {
        let filters = query.filters().clone();
        match &plan.steps[index].binding {
            InputBinding::Literal { text } => Ok(SubQuery::literal(text.clone(), filters)),
            InputBinding::StepOutput {
                step,
                field,
                instruction,
            } => {
                let upstream = outcomes
                    .get(*step)
                    .and_then(Option::as_ref)
                    .filter(|o| o.status.is_usable())
                    .and_then(|o| o.result.as_ref())
                    .ok_or(SkipReason::DependencyFailed { step: *step })?;

                let mut bound_values: Vec<String> = Vec::new();
                for value in upstream.records.iter().flat_map(|r| r.field_values(field)) {
                    if !bound_values.contains(&value) {
                        bound_values.push(value);
                    }
                }
                if bound_values.is_empty() {
                    return Err(SkipReason::NoUpstreamValues { step: *step });
                }

                Ok(SubQuery {
                    text: instruction.clone(),
                    bound_values,
                    filters,
                })
            }
        }
    }

    async fn run_step(
        &self,
        index: usize,
        tool: String,
        optional: bool,
        adapter: Option<Arc<dyn RetrieverAdapter>>,
        sub_query: SubQuery,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let start = Instant::now();
        let mut outcome = StepOutcome {
            index,
            tool,
            status: StepStatus::Ok,
            result: None,
            attempts: 0,
            sub_query: None,
            latency_ms: 0,
            optional,
        };

        let Some(adapter) = adapter else {
            // Only reachable when the plan was validated against another registry.
            outcome.status = StepStatus::Failed {
                reason: FailureReason::Backend,
                message: format!("tool '{}' is not registered", outcome.tool),
            };
            outcome.sub_query = Some(sub_query);
            return outcome;
        };

        let attempt = self
            .attempt(adapter.as_ref(), &sub_query, cancel, &mut outcome.attempts)
            .await;
        outcome.latency_ms = elapsed_ms(start);

        match attempt {
            Attempt::Done(result) => {
                outcome.status = match result.status {
                    RetrievalStatus::Ok => StepStatus::Ok,
                    RetrievalStatus::Partial => StepStatus::Partial,
                    RetrievalStatus::Failed => StepStatus::Failed {
                        reason: FailureReason::Backend,
                        message: "adapter reported a failed result".to_string(),
                    },
                };
                tracing::info!(
                    step = index,
                    tool = %outcome.tool,
                    records = result.records.len(),
                    latency_ms = outcome.latency_ms,
                    "Step completed"
                );
                outcome.result = Some(result);
            }
            Attempt::Failed(err) => {
                tracing::warn!(
                    step = index,
                    tool = %outcome.tool,
                    error = %err,
                    attempts = outcome.attempts,
                    "Step failed"
                );
                outcome.status = StepStatus::Failed {
                    reason: err.reason(),
                    message: err.to_string(),
                };
                outcome.result = Some(RetrievalResult::failed(
                    outcome.tool.clone(),
                    adapter.capability(),
                    outcome.latency_ms,
                ));
            }
            Attempt::Cancelled => {
                outcome.status = StepStatus::Failed {
                    reason: FailureReason::Cancelled,
                    message: "request was cancelled".to_string(),
                };
                outcome.result = Some(RetrievalResult::failed(
                    outcome.tool.clone(),
                    adapter.capability(),
                    outcome.latency_ms,
                ));
            }
        }

        outcome.sub_query = Some(sub_query);
        outcome
    }

    /// Call the adapter under the step timeout, retrying a retryable
    /// failure once after the backoff.
    async fn attempt(
        &self,
        adapter: &dyn RetrieverAdapter,
        sub_query: &SubQuery,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Attempt {
        loop {
            *attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Attempt::Cancelled,
                result = tokio::time::timeout(self.step_timeout, adapter.retrieve(sub_query)) => result,
            };

            let err = match result {
                Ok(Ok(result)) => return Attempt::Done(result),
                Ok(Err(err)) => err,
                Err(_) => RetrievalError::Timeout {
                    tool: adapter.name().to_string(),
                    after_ms: self.step_timeout.as_millis().try_into().unwrap_or(u64::MAX),
                },
            };

            if *attempts > 1 || !err.is_retryable() {
                return Attempt::Failed(err);
            }

            tracing::debug!(tool = adapter.name(), error = %err, "Retrying after backoff");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Attempt::Cancelled,
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }
        }
    }
}

enum Attempt {
    Done(RetrievalResult),
    Failed(RetrievalError),
    Cancelled,
}

/// Group step indices into levels: a step runs one level after the step it
/// binds to.
fn levels(plan: &Plan) -> Vec<Vec<usize>> {
    let mut level_of: Vec<usize> = Vec::with_capacity(plan.steps.len());
    let mut levels: Vec<Vec<usize>> = Vec::new();

    for (i, step) in plan.steps.iter().enumerate() {
        let level = match step.binding.dependency() {
            Some(dep) if dep < i => level_of[dep] + 1,
            _ => 0,
        };
        level_of.push(level);
        if levels.len() <= level {
            levels.resize(level + 1, Vec::new());
        }
        levels[level].push(i);
    }
    levels
}
