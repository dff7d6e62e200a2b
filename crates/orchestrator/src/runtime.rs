//! Runtime wiring: configuration and snapshots → [`Orchestrator`].

use crate::adapter::{GraphAdapter, RetrieverAdapter, SemanticAdapter, StructuredAdapter};
use crate::feedback::{FeedbackSink, JsonlFeedbackSink};
use crate::orchestrator::Orchestrator;
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::synthesizer::AnswerSynthesizer;
use crate::types::Capability;
use compass_core::config::ProviderConfig;
use compass_core::{AppConfig, AppError, AppResult, OrchestrationConfig, ToolConfig};
use compass_knowledge::{
    create_provider, ColumnKind, EmbeddingProvider, GraphStore, InMemoryGraphStore,
    InMemoryTableStore, InMemoryVectorIndex, SnapshotSet, TableStore, VectorIndex,
};
use compass_llm::{create_client, ExtractiveClient, LlmClient};
use compass_prompt::{resolve_prompt, GROUNDED_ANSWER_PROMPT_ID};
use std::sync::Arc;
use std::time::Duration;

const EMBEDDING_PROVIDER: &str = "trigram";

/// Read-only backends shared by every adapter of one runtime.
pub struct Backends {
    pub tables: Arc<dyn TableStore>,
    pub index: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Backends {
    /// Build the stores from one snapshot generation.
    pub async fn from_snapshots(snapshots: SnapshotSet, dimensions: usize) -> AppResult<Self> {
        let embedder = create_provider(EMBEDDING_PROVIDER, dimensions)?;
        let index = InMemoryVectorIndex::build(&snapshots.documents, embedder.as_ref()).await?;
        Ok(Self {
            tables: Arc::new(InMemoryTableStore::new(snapshots.tables)),
            index: Arc::new(index),
            graph: Arc::new(InMemoryGraphStore::new(snapshots.graph)),
            embedder,
        })
    }

    pub(crate) fn adapter(
        &self,
        name: &str,
        capability: Capability,
        config: &OrchestrationConfig,
    ) -> Arc<dyn RetrieverAdapter> {
        match capability {
            Capability::Structured => Arc::new(StructuredAdapter::new(
                name,
                Arc::clone(&self.tables),
                config.max_rows,
            )),
            Capability::Semantic => Arc::new(SemanticAdapter::new(
                name,
                Arc::clone(&self.index),
                Arc::clone(&self.embedder),
                config.semantic_top_k,
                config.similarity_floor,
            )),
            Capability::Graph => Arc::new(GraphAdapter::new(
                name,
                Arc::clone(&self.graph),
                config.max_hops,
                config.max_paths,
            )),
        }
    }

    /// Descriptors of the built-in tools, with routing keywords taken from
    /// the snapshot. Backends without data get no tool.
    pub(crate) fn default_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::new();

        let schemas = self.tables.schema();
        if !schemas.is_empty() {
            let mut keywords: Vec<String> = Vec::new();
            let mut fields: Vec<String> = Vec::new();
            for schema in &schemas {
                keywords.push(keyword(&schema.name));
                for column in &schema.columns {
                    if column.kind == ColumnKind::Numeric {
                        keywords.push(keyword(&column.name));
                    }
                    if !fields.contains(&column.name) {
                        fields.push(column.name.clone());
                    }
                }
            }
            keywords.sort();
            keywords.dedup();
            let binding = if fields.iter().any(|f| f == "name") { "name" } else { "key" };

            descriptors.push(
                ToolDescriptor::new("sql_query", Capability::Structured)
                    .with_description(format!(
                        "Filters, compares and ranks rows of the {} table(s)",
                        schemas.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
                    ))
                    .with_keywords(keywords)
                    .with_fields(fields)
                    .with_binding_field(binding)
                    .with_cost_hint(1),
            );
        }

        let graph = self.graph.schema();
        if !graph.labels.is_empty() {
            let mut keywords: Vec<String> = graph
                .labels
                .iter()
                .chain(graph.relations.iter())
                .map(|k| keyword(k))
                .collect();
            keywords.sort();
            keywords.dedup();

            descriptors.push(
                ToolDescriptor::new("graph_search", Capability::Graph)
                    .with_description("Finds paths between entities in the relationship graph")
                    .with_keywords(keywords)
                    .with_fields(["name", "id"])
                    .with_binding_field("name")
                    .with_cost_hint(2),
            );
        }

        if !self.index.is_empty() {
            descriptors.push(
                ToolDescriptor::new("vector_search", Capability::Semantic)
                    .with_description("Retrieves document passages by similarity")
                    .with_fields(["title", "id"])
                    .with_binding_field("title")
                    .with_cost_hint(3),
            );
        }

        descriptors
    }
}

/// `risk_level` → `risk level`
fn keyword(name: &str) -> String {
    name.replace(['_', '-'], " ").to_lowercase()
}

fn configured_descriptor(tool: &ToolConfig) -> AppResult<ToolDescriptor> {
    let capability = Capability::parse(&tool.capability).ok_or_else(|| {
        AppError::Config(format!(
            "Tool '{}' has unknown capability '{}' (expected structured, graph or semantic)",
            tool.name, tool.capability
        ))
    })?;

    Ok(ToolDescriptor::new(tool.name.clone(), capability)
        .with_description(tool.description.clone())
        .with_keywords(tool.keywords.iter().cloned())
        .with_binding_field(tool.binding_field.clone())
        .with_cost_hint(tool.cost_hint))
}

/// Build the tool registry: the configured tools, or the built-in ones when
/// none are configured.
pub fn build_registry(
    backends: &Backends,
    tools: &[ToolConfig],
    config: &OrchestrationConfig,
) -> AppResult<ToolRegistry> {
    let descriptors = if tools.is_empty() {
        backends.default_descriptors()
    } else {
        tools.iter().map(configured_descriptor).collect::<AppResult<Vec<_>>>()?
    };

    let mut builder = ToolRegistry::builder();
    for descriptor in descriptors {
        let adapter = backends.adapter(&descriptor.name, descriptor.capability, config);
        builder = builder
            .register(descriptor, adapter)
            .map_err(|e| AppError::Config(e.to_string()))?;
    }

    let registry = builder.build();
    tracing::info!(tools = registry.len(), "Tool registry ready");
    Ok(registry)
}

/// Create the generative backend for the active provider.
pub fn build_llm(config: &AppConfig) -> AppResult<Arc<dyn LlmClient>> {
    match config.get_provider_config(&config.provider) {
        Some(ProviderConfig::Ollama {
            endpoint, timeout, ..
        }) => create_client(
            &config.provider,
            Some(endpoint.as_str()),
            timeout.map(Duration::from_secs),
        ),
        Some(ProviderConfig::Extractive { snippet_chars }) => {
            Ok(Arc::new(ExtractiveClient::with_snippet_chars(*snippet_chars)))
        }
        None => create_client(&config.provider, None, None),
    }
}

/// Wire a complete orchestrator from configuration.
///
/// Loads the snapshots, builds the stores and registry, resolves the
/// grounding prompt (workspace override first) and starts the feedback
/// writer. Must be called inside a Tokio runtime.
pub async fn build_orchestrator(config: &AppConfig) -> AppResult<Orchestrator> {
    config.validate()?;

    let snapshots = SnapshotSet::load(
        &config.tables_path(),
        &config.documents_path(),
        &config.graph_path(),
    )?;
    let backends = Backends::from_snapshots(snapshots, config.backends.embedding_dimensions).await?;
    let registry = build_registry(&backends, &config.tools, &config.orchestration)?;

    let prompts_dir = config.prompts_dir();
    let prompt = resolve_prompt(Some(prompts_dir.as_path()), GROUNDED_ANSWER_PROMPT_ID)?;
    let synthesizer = AnswerSynthesizer::new(
        build_llm(config)?,
        config.model.clone(),
        prompt,
        config.orchestration.fusion_top_n,
    );

    let feedback: Arc<dyn FeedbackSink> = Arc::new(JsonlFeedbackSink::spawn(config.feedback_path()));

    tracing::debug!(
        provider = %config.provider,
        model = %config.model,
        feedback = %config.feedback_path().display(),
        "Orchestrator ready"
    );

    Ok(Orchestrator::new(
        &config.orchestration,
        Arc::new(registry),
        synthesizer,
        feedback,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::enterprise_snapshots;

    async fn backends() -> Backends {
        Backends::from_snapshots(enterprise_snapshots(), 384).await.unwrap()
    }

    #[tokio::test]
    async fn test_default_tools_derive_keywords() {
        let backends = backends().await;
        let registry = build_registry(&backends, &[], &OrchestrationConfig::default()).unwrap();

        let names: Vec<&str> = registry.list_all().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["graph_search", "sql_query", "vector_search"]);

        let sql = registry.describe("sql_query").unwrap();
        assert!(sql.keywords.contains(&"customers".to_string()));
        assert!(sql.keywords.contains(&"revenue".to_string()));
        assert_eq!(sql.output_schema.binding_field, "name");

        let graph = registry.describe("graph_search").unwrap();
        assert!(graph.keywords.contains(&"vendor".to_string()));
        assert!(graph.keywords.contains(&"supplies".to_string()));
    }

    #[tokio::test]
    async fn test_empty_backends_register_nothing() {
        let backends = Backends::from_snapshots(SnapshotSet::default(), 64).await.unwrap();
        let registry = build_registry(&backends, &[], &OrchestrationConfig::default()).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_configured_tools() {
        let backends = backends().await;
        let tools = vec![ToolConfig {
            name: "crm_tables".to_string(),
            capability: "sql".to_string(),
            description: "CRM".to_string(),
            keywords: vec!["accounts".to_string()],
            cost_hint: 4,
            binding_field: "name".to_string(),
        }];
        let registry = build_registry(&backends, &tools, &OrchestrationConfig::default()).unwrap();
        assert_eq!(registry.len(), 1);
        let tool = registry.describe("crm_tables").unwrap();
        assert_eq!(tool.capability, Capability::Structured);
        assert_eq!(tool.cost_hint, 4);
    }

    #[tokio::test]
    async fn test_unknown_capability_is_a_config_error() {
        let backends = backends().await;
        let tools = vec![ToolConfig {
            name: "oracle".to_string(),
            capability: "psychic".to_string(),
            description: String::new(),
            keywords: Vec::new(),
            cost_hint: 1,
            binding_field: "name".to_string(),
        }];
        let err = build_registry(&backends, &tools, &OrchestrationConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_orchestrator_from_workspace() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = dir.path().join(".compass").join("data");
        std::fs::create_dir_all(&data).unwrap();
        let snapshots = enterprise_snapshots();
        std::fs::write(
            data.join("tables.json"),
            serde_json::to_string(&snapshots.tables).unwrap(),
        )
        .unwrap();

        let config = AppConfig {
            workspace: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let orchestrator = build_orchestrator(&config).await.unwrap();
        let names: Vec<&str> = orchestrator
            .registry()
            .list_all()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["sql_query"]);
    }
}
