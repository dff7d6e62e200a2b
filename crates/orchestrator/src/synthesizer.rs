//! Answer synthesis: grounding prompt → generative backend → cited answer.

use crate::error::OrchestrationError;
use crate::executor::{ExecutionReport, StepOutcome, StepStatus};
use crate::fusion::{Evidence, EvidenceSet};
use crate::plan::Plan;
use crate::screening::{screen_all, ScreeningFlag};
use crate::text::contains_phrase;
use crate::types::{Provenance, Query};
use compass_llm::{ExtractiveClient, LlmClient, LlmRequest};
use compass_prompt::{build_prompt, PromptDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

/// Text of the canonical answer when no evidence was found.
pub const INSUFFICIENT_EVIDENCE_TEXT: &str =
    "Insufficient evidence: the available sources do not contain enough information to answer this question.";

/// Evidence scoring below this marks the prompt as low confidence.
const LOW_CONFIDENCE_SCORE: f32 = 0.5;

const HEDGE_PENALTY: f32 = 0.6;
const UNVERIFIED_PENALTY: f32 = 0.8;
const DEGRADED_PENALTY: f32 = 0.8;

/// Phrases that signal the model is unsure of its answer.
const HEDGES: &[&str] = &[
    "may be incomplete",
    "not sure",
    "unclear",
    "could not find",
    "cannot determine",
    "not available",
    "insufficient",
    "possibly",
    "it appears",
    "might",
];

/// `[3]` or `[1, 4]`
static MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").ok());

/// A cited evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Marker used in the answer text
    pub marker: usize,
    pub provenance: Provenance,
    pub tool: String,
    pub origins: Vec<String>,
    pub score: f32,
}

/// Audit view of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub index: usize,
    pub tool: String,
    pub status: StepStatus,
    pub records: usize,
    pub attempts: u32,
    pub latency_ms: u64,
}

impl From<&StepOutcome> for StepSummary {
    fn from(outcome: &StepOutcome) -> Self {
        Self {
            index: outcome.index,
            tool: outcome.tool.clone(),
            status: outcome.status.clone(),
            records: outcome.result.as_ref().map_or(0, |r| r.records.len()),
            attempts: outcome.attempts,
            latency_ms: outcome.latency_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub request_id: String,
    pub query: String,
    pub text: String,
    /// In order of first use in `text`
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub plan_used: Plan,
    pub steps: Vec<StepSummary>,
    #[serde(default)]
    pub flags: Vec<ScreeningFlag>,
    pub degraded: bool,
    pub evidence_count: usize,
}

impl Answer {
    /// The canonical answer for a request without evidence.
    pub fn insufficient(query: &Query, plan: Plan, steps: Vec<StepSummary>, degraded: bool) -> Self {
        Self {
            request_id: query.request_id().to_string(),
            query: query.text().to_string(),
            text: INSUFFICIENT_EVIDENCE_TEXT.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            plan_used: plan,
            steps,
            flags: Vec::new(),
            degraded,
            evidence_count: 0,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.citations.is_empty() && self.confidence == 0.0
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
    top_n: usize,
    fallback: ExtractiveClient,
}

impl AnswerSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        prompt: PromptDefinition,
        top_n: usize,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt,
            top_n: top_n.max(1),
            fallback: ExtractiveClient::new(),
        }
    }

    /// Build the answer for `query` from `evidence`.
    ///
    /// Only the top `top_n` records are shown to the model, and only those
    /// can be cited.
    pub async fn synthesize(
        &self,
        query: &Query,
        evidence: &EvidenceSet,
        report: &ExecutionReport,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestrationError> {
        let steps: Vec<StepSummary> = report.all_steps().map(StepSummary::from).collect();
        let degraded = report.degraded();

        if evidence.is_empty() {
            tracing::info!(request_id = %query.request_id(), "No evidence, returning insufficient-evidence answer");
            return Ok(Answer::insufficient(query, report.plan.clone(), steps, degraded));
        }

        let context = evidence.top(self.top_n);
        let request = self.request(query, context)?;
        let raw = self.generate(&request, cancel).await?;

        let (text, cited) = resolve_markers(&raw, context.len());
        let verified = !cited.is_empty();
        let cited = if verified {
            cited
        } else {
            tracing::warn!(request_id = %query.request_id(), "Answer carries no valid citation markers");
            (1..=context.len()).collect()
        };

        let citations: Vec<Citation> = cited
            .into_iter()
            .filter_map(|marker| {
                context.get(marker - 1).map(|e| Citation {
                    marker,
                    provenance: e.record.provenance.clone(),
                    tool: e.tool.clone(),
                    origins: e.origins.clone(),
                    score: e.score,
                })
            })
            .collect();

        let hedged = is_hedged(&text, context);
        let confidence = confidence(context, hedged, !verified, degraded);

        let labels: Vec<(String, String)> = context
            .iter()
            .map(|e| (e.record.summary_text(), e.record.label()))
            .collect();
        let flags = screen_all(
            std::iter::once((text.as_str(), "answer"))
                .chain(labels.iter().map(|(t, l)| (t.as_str(), l.as_str()))),
        );

        tracing::info!(
            request_id = %query.request_id(),
            citations = citations.len(),
            confidence,
            hedged,
            verified,
            "Synthesized answer"
        );

        Ok(Answer {
            request_id: query.request_id().to_string(),
            query: query.text().to_string(),
            text,
            citations,
            confidence,
            plan_used: report.plan.clone(),
            steps,
            flags,
            degraded,
            evidence_count: evidence.len(),
        })
    }

    fn request(&self, query: &Query, context: &[Evidence]) -> Result<LlmRequest, OrchestrationError> {
        let evidence: Vec<Value> = context
            .iter()
            .enumerate()
            .map(|(i, e)| {
                json!({
                    "marker": i + 1,
                    "label": neutralize_markers(&e.record.label()),
                    "content": neutralize_markers(&e.record.summary_text()),
                })
            })
            .collect();
        let low_confidence = context.first().map_or(true, |e| e.score < LOW_CONFIDENCE_SCORE);

        let mut variables = BTreeMap::new();
        variables.insert("question".to_string(), json!(query.text()));
        variables.insert("evidence".to_string(), Value::Array(evidence));
        variables.insert("lowConfidence".to_string(), json!(low_confidence));

        let built = build_prompt(&self.prompt, &variables).map_err(OrchestrationError::Synthesis)?;
        let mut request = LlmRequest::new(built.user, &self.model).with_temperature(0.0);
        if let Some(system) = built.system {
            request = request.with_system(system);
        }
        Ok(request)
    }

    /// Call the model, falling back to extractive generation if it fails.
    async fn generate(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestrationError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            response = self.llm.complete(request) => response,
        };

        match response {
            Ok(response) => Ok(response.content.trim().to_string()),
            Err(e) => {
                tracing::warn!(
                    provider = self.llm.provider_name(),
                    error = %e,
                    "Generative backend failed, answering extractively"
                );
                let response = self
                    .fallback
                    .complete(request)
                    .await
                    .map_err(OrchestrationError::Synthesis)?;
                Ok(response.content.trim().to_string())
            }
        }
    }
}

/// Strip markers outside `1..=available` and collect the valid ones in
/// order of first use.
fn resolve_markers(text: &str, available: usize) -> (String, Vec<usize>) {
    let Some(re) = MARKER.as_ref() else {
        return (text.to_string(), Vec::new());
    };

    let mut cited: Vec<usize> = Vec::new();
    let rewritten = re.replace_all(text, |caps: &regex::Captures<'_>| {
        let valid: Vec<usize> = caps[1]
            .split(',')
            .filter_map(|n| n.trim().parse::<usize>().ok())
            .filter(|n| (1..=available).contains(n))
            .collect();
        for marker in &valid {
            if !cited.contains(marker) {
                cited.push(*marker);
            }
        }
        if valid.is_empty() {
            String::new()
        } else {
            let list: Vec<String> = valid.iter().map(ToString::to_string).collect();
            format!("[{}]", list.join(", "))
        }
    });

    let text = rewritten
        .lines()
        .map(|line| line.trim_end().replace(" .", ".").replace("  ", " "))
        .collect::<Vec<_>>()
        .join("\n");
    (text, cited)
}

/// Rewrite bracketed numbers in source text (`[3]` → `(3)`) so they cannot
/// pass for citation markers.
fn neutralize_markers(text: &str) -> String {
    match MARKER.as_ref() {
        Some(re) => re.replace_all(text, "($1)").into_owned(),
        None => text.to_string(),
    }
}

/// Hedge phrases count only in lines the model wrote itself. A line quoted
/// from the evidence carries the source's wording, not the model's.
fn is_hedged(text: &str, context: &[Evidence]) -> bool {
    let sources: Vec<String> = context
        .iter()
        .map(|e| neutralize_markers(&e.record.summary_text()))
        .collect();

    text.lines()
        .filter(|line| !is_quoted(line, &sources))
        .any(|line| HEDGES.iter().any(|hedge| contains_phrase(line, hedge)))
}

fn is_quoted(line: &str, sources: &[String]) -> bool {
    let Some(re) = MARKER.as_ref() else {
        return false;
    };
    let stripped = re.replace_all(line, "").replace(" .", ".");
    let quote = stripped
        .trim()
        .trim_start_matches("- ")
        .trim_end_matches("...")
        .trim_end_matches('.')
        .trim();
    !quote.is_empty() && sources.iter().any(|source| source.contains(quote))
}

/// `top × (0.7 + 0.3 × mean(top-3))` with penalties, clamped to [0, 1].
fn confidence(context: &[Evidence], hedged: bool, unverified: bool, degraded: bool) -> f32 {
    let Some(top) = context.first().map(|e| e.score) else {
        return 0.0;
    };
    let head: Vec<f32> = context.iter().take(3).map(|e| e.score).collect();
    let mean = head.iter().sum::<f32>() / head.len() as f32;

    let mut confidence = top * (0.7 + 0.3 * mean);
    if hedged {
        confidence *= HEDGE_PENALTY;
    }
    if unverified {
        confidence *= UNVERIFIED_PENALTY;
    }
    if degraded {
        confidence *= DEGRADED_PENALTY;
    }
    confidence.clamp(0.0, 1.0)
}
