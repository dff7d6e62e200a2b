//! End-to-end scenarios over the enterprise fixture.

use super::fixtures::{
    enterprise_backends, enterprise_registry, fixture_config, orchestrator, MemorySink, Script,
    ScriptedAdapter,
};
use crate::adapter::RetrieverAdapter;
use crate::error::{FailureReason, OrchestrationError, ValidationError};
use crate::executor::{ChainExecutor, SkipReason, StepStatus};
use crate::feedback::Rating;
use crate::fusion::EvidenceFuser;
use crate::orchestrator::Orchestrator;
use crate::plan::{Plan, Step};
use crate::router::QueryRouter;
use crate::synthesizer::{Answer, AnswerSynthesizer, INSUFFICIENT_EVIDENCE_TEXT};
use crate::types::{Capability, Query, SourceType};
use compass_core::config::FallbackPolicy;
use compass_core::OrchestrationConfig;
use compass_llm::ExtractiveClient;
use compass_prompt::{builtin_prompt, GROUNDED_ANSWER_PROMPT_ID};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REVENUE_QUESTION: &str = "List customers with revenue above $40M";
const ASSESSMENT_QUESTION: &str = "What did the Q3 risk assessment say about BioMed Research?";
const RELATIONSHIP_QUESTION: &str =
    "Show relationships between flagged vendors and affected contracts";
const CHAINED_QUESTION: &str = "Find high-risk customers, then summarize their related emails";

async fn setup_with(config: OrchestrationConfig) -> (Orchestrator, Arc<MemorySink>) {
    let backends = enterprise_backends().await;
    let registry = enterprise_registry(&backends, &config, Vec::new());
    let sink = Arc::new(MemorySink::default());
    (orchestrator(&config, registry, Arc::clone(&sink)), sink)
}

async fn setup() -> Orchestrator {
    setup_with(fixture_config()).await.0
}

async fn ask(orchestrator: &Orchestrator, text: &str) -> Answer {
    orchestrator
        .ask(&Query::new(text).unwrap(), &CancellationToken::new())
        .await
        .unwrap()
}

fn cited(answer: &Answer) -> Vec<(String, String)> {
    answer
        .citations
        .iter()
        .map(|c| (c.provenance.source_id.clone(), c.provenance.locator.clone()))
        .collect()
}

#[tokio::test]
async fn test_structured_question_cites_rows() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, REVENUE_QUESTION).await;

    assert_eq!(answer.plan_used.tools(), vec!["sql_query"]);
    assert!(!answer.degraded);
    assert_eq!(answer.evidence_count, 2);

    let cited = cited(&answer);
    assert!(cited.contains(&("customers".to_string(), "row:c1".to_string())));
    assert!(cited.contains(&("customers".to_string(), "row:c3".to_string())));
    assert!(answer
        .citations
        .iter()
        .all(|c| c.provenance.source_type == SourceType::Table));
    assert!(answer.text.contains("[1]"));
    assert!(answer.confidence > 0.9);
}

#[tokio::test]
async fn test_document_question_cites_passages() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, ASSESSMENT_QUESTION).await;

    assert_eq!(answer.plan_used.tools(), vec!["vector_search"]);
    assert!(!answer.citations.is_empty());
    assert!(answer
        .citations
        .iter()
        .all(|c| c.provenance.source_type == SourceType::Document));
    assert!(cited(&answer).contains(&("report-q3".to_string(), "chunk:0".to_string())));
    assert!(answer.text.contains("BioMed Research"));
}

#[tokio::test]
async fn test_relationship_question_cites_paths() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, RELATIONSHIP_QUESTION).await;

    assert_eq!(answer.plan_used.tools(), vec!["graph_search"]);
    let mut cited = cited(&answer);
    cited.sort();
    assert_eq!(
        cited,
        vec![
            ("v1".to_string(), "path:v1/e1/k1".to_string()),
            ("v1".to_string(), "path:v1/e2/k3".to_string()),
        ]
    );
    assert!(answer.text.contains("SUPPLIES"));
}

#[tokio::test]
async fn test_chained_question_binds_upstream_names() {
    let config = fixture_config();
    let backends = enterprise_backends().await;
    let vector = Arc::new(ScriptedAdapter::new(
        "vector_search",
        Capability::Semantic,
        Script::Records(Vec::new()),
    ));
    let overrides: Vec<Arc<dyn RetrieverAdapter>> = vec![vector.clone()];
    let registry = enterprise_registry(&backends, &config, overrides);
    let router = QueryRouter::new(&config);
    let query = Query::new(CHAINED_QUESTION).unwrap();

    let plan = router.route(&query, &registry).unwrap();
    assert_eq!(plan.tools(), vec!["sql_query", "vector_search"]);
    assert_eq!(plan.dependency(1), Some(0));

    ChainExecutor::from_config(&config)
        .execute(&query, &plan, &registry, &CancellationToken::new())
        .await
        .unwrap();
    let seen = vector.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].bound_values, vec!["BioMed Research", "Helix Pharma"]);
}

#[tokio::test]
async fn test_chained_question_cites_rows_and_passages() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, CHAINED_QUESTION).await;

    assert_eq!(answer.plan_used.len(), 2);
    let types: Vec<SourceType> = answer
        .citations
        .iter()
        .map(|c| c.provenance.source_type)
        .collect();
    assert!(types.contains(&SourceType::Table));
    assert!(types.contains(&SourceType::Document));

    // The Helix Pharma row was extracted from the escalation email.
    let merged = answer
        .citations
        .iter()
        .find(|c| c.provenance.source_id == "email-102")
        .unwrap();
    assert_eq!(merged.origins, vec!["sql_query", "vector_search"]);
}

#[tokio::test]
async fn test_timed_out_branch_degrades_answer() {
    let config = fixture_config();
    let backends = enterprise_backends().await;
    let slow = Arc::new(ScriptedAdapter::new(
        "vector_search",
        Capability::Semantic,
        Script::Sleep(Duration::from_secs(30)),
    ));
    let overrides: Vec<Arc<dyn RetrieverAdapter>> = vec![slow.clone()];
    let registry = enterprise_registry(&backends, &config, overrides);
    let orchestrator = orchestrator(&config, registry, Arc::new(MemorySink::default()));

    let question = format!("{} and also {}", REVENUE_QUESTION, ASSESSMENT_QUESTION);
    let answer = ask(&orchestrator, &question).await;

    assert_eq!(answer.plan_used.tools(), vec!["sql_query", "vector_search"]);
    assert!(answer.degraded);
    assert!(!answer.is_insufficient());
    assert!(matches!(
        answer.steps[1].status,
        StepStatus::Failed {
            reason: FailureReason::Timeout,
            ..
        }
    ));
    assert_eq!(answer.steps[1].attempts, 2);
    assert_eq!(slow.calls(), 2);
    assert!(answer
        .citations
        .iter()
        .all(|c| c.provenance.source_type == SourceType::Table));

    let healthy = ask(&setup().await, REVENUE_QUESTION).await;
    assert!(answer.confidence < healthy.confidence);
}

#[tokio::test]
async fn test_citations_come_from_fused_evidence() {
    let config = fixture_config();
    let backends = enterprise_backends().await;
    let registry = enterprise_registry(&backends, &config, Vec::new());
    let synthesizer = AnswerSynthesizer::new(
        Arc::new(ExtractiveClient::new()),
        "extractive",
        builtin_prompt(GROUNDED_ANSWER_PROMPT_ID).unwrap(),
        config.fusion_top_n,
    );
    let cancel = CancellationToken::new();

    for text in [REVENUE_QUESTION, ASSESSMENT_QUESTION, RELATIONSHIP_QUESTION, CHAINED_QUESTION] {
        let query = Query::new(text).unwrap();
        let plan = QueryRouter::new(&config).route(&query, &registry).unwrap();
        let report = ChainExecutor::from_config(&config)
            .execute(&query, &plan, &registry, &cancel)
            .await
            .unwrap();
        let evidence = EvidenceFuser::default().fuse(&report.usable_results(), None);
        let answer = synthesizer
            .synthesize(&query, &evidence, &report, &cancel)
            .await
            .unwrap();

        assert!(!answer.citations.is_empty(), "{}", text);
        for citation in &answer.citations {
            assert!(
                evidence
                    .iter()
                    .any(|e| e.record.provenance == citation.provenance),
                "{} cites {} outside its evidence",
                text,
                citation.provenance
            );
        }
    }
}

#[tokio::test]
async fn test_repeated_requests_are_deterministic() {
    let orchestrator = setup().await;

    for text in [REVENUE_QUESTION, RELATIONSHIP_QUESTION, CHAINED_QUESTION] {
        let first = ask(&orchestrator, text).await;
        let second = ask(&orchestrator, text).await;
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(first.plan_used, second.plan_used);
        assert_eq!(first.text, second.text);
        assert_eq!(first.citations, second.citations);
        assert_eq!(first.confidence, second.confidence);
    }
}

#[tokio::test]
async fn test_reexecuting_a_plan_yields_same_evidence() {
    let config = fixture_config();
    let backends = enterprise_backends().await;
    let registry = enterprise_registry(&backends, &config, Vec::new());
    let executor = ChainExecutor::from_config(&config);
    let query = Query::new(CHAINED_QUESTION).unwrap();
    let plan = QueryRouter::new(&config).route(&query, &registry).unwrap();
    let cancel = CancellationToken::new();

    let first = executor.execute(&query, &plan, &registry, &cancel).await.unwrap();
    let second = executor.execute(&query, &plan, &registry, &cancel).await.unwrap();

    let fuser = EvidenceFuser::default();
    assert_eq!(
        fuser.fuse(&first.usable_results(), None),
        fuser.fuse(&second.usable_results(), None)
    );
}

#[tokio::test]
async fn test_no_matching_rows_is_insufficient() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, "List customers with revenue above $900B").await;

    assert!(answer.is_insufficient());
    assert_eq!(answer.text, INSUFFICIENT_EVIDENCE_TEXT);
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.citations.is_empty());
    assert!(!answer.degraded);
}

#[tokio::test]
async fn test_failed_plan_falls_back_to_another_tool() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, "List flagged vendors with contracts above 5").await;

    assert_eq!(answer.plan_used.tools(), vec!["graph_search"]);
    assert!(answer.degraded);
    assert!(!answer.citations.is_empty());
    let superseded = answer.steps.iter().find(|s| s.tool == "sql_query").unwrap();
    assert!(matches!(
        superseded.status,
        StepStatus::Failed {
            reason: FailureReason::Translation,
            ..
        }
    ));
}

#[tokio::test]
async fn test_total_failure_is_insufficient_not_error() {
    let question = "List invoices with profit above 5";

    let answer = ask(&setup().await, question).await;
    assert!(answer.is_insufficient());
    assert!(answer.degraded);
    assert!(answer.citations.is_empty());
    assert!(answer.steps.iter().all(|s| !s.status.is_usable()));

    // The failed fallback is part of the audit trail.
    let fallback_tool = answer.plan_used.tools()[0].to_string();
    assert_ne!(fallback_tool, "sql_query");
    let tools: Vec<&str> = answer.steps.iter().map(|s| s.tool.as_str()).collect();
    assert_eq!(tools, vec!["sql_query", fallback_tool.as_str()]);

    let config = OrchestrationConfig {
        fallback_policy: FallbackPolicy::InsufficientInformation,
        ..fixture_config()
    };
    let (strict, _) = setup_with(config).await;
    let answer = ask(&strict, question).await;
    assert!(answer.is_insufficient());
    assert_eq!(answer.plan_used.tools(), vec!["sql_query"]);
    assert_eq!(answer.steps.len(), 1);
}

#[tokio::test]
async fn test_total_failure_keeps_skipped_steps() {
    let config = OrchestrationConfig {
        fallback_policy: FallbackPolicy::InsufficientInformation,
        ..fixture_config()
    };
    let (strict, _) = setup_with(config).await;
    let plan = Plan::new(vec![
        Step::literal("sql_query", "List invoices with profit above 5"),
        Step::bound("vector_search", 0, "name", "summarize their related emails"),
    ]);

    let answer = strict
        .ask_with_plan(
            &Query::new("List invoices with profit above 5, then summarize their related emails")
                .unwrap(),
            plan,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(answer.is_insufficient());
    assert!(answer.degraded);
    assert_eq!(answer.steps.len(), 2);
    assert!(matches!(
        answer.steps[0].status,
        StepStatus::Failed {
            reason: FailureReason::Translation,
            ..
        }
    ));
    assert_eq!(answer.steps[1].tool, "vector_search");
    assert_eq!(
        answer.steps[1].status,
        StepStatus::Skipped {
            reason: SkipReason::DependencyFailed { step: 0 }
        }
    );
}

#[tokio::test]
async fn test_cancelled_request_is_an_error() {
    let orchestrator = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .ask(&Query::new(REVENUE_QUESTION).unwrap(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Cancelled));
}

#[tokio::test]
async fn test_supplied_plan_is_validated() {
    let orchestrator = setup().await;
    let plan = Plan::new(vec![Step::literal("crystal_ball", "anything")]);

    let err = orchestrator
        .ask_with_plan(&Query::new("anything").unwrap(), plan, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Validation(ValidationError::UnknownTool { .. })
    ));
}

#[tokio::test]
async fn test_rating_an_answer_records_feedback() {
    let (orchestrator, sink) = setup_with(fixture_config()).await;
    let answer = ask(&orchestrator, REVENUE_QUESTION).await;

    assert!(orchestrator.rate(&answer.request_id, Rating::Helpful));
    assert!(!orchestrator.rate("no-such-request", Rating::NotHelpful));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].prompt.contains(REVENUE_QUESTION));
    assert_eq!(entries[0].completion, answer.text);
    assert_eq!(entries[0].rating, Rating::Helpful);
}

#[tokio::test]
async fn test_answer_flags_contact_details() {
    let orchestrator = setup().await;
    let answer = ask(&orchestrator, "Summarize the renewal email from BioMed Research").await;

    assert!(answer
        .flags
        .iter()
        .any(|f| f.term == "dana.cole@biomed-research.com"));
}
