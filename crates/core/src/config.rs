//! Configuration management for Compass.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config files (.compass/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Everything here is consumed once at process start; there is no hot reload.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .compass/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Generative backend provider (e.g., "ollama", "extractive")
    pub provider: String,

    /// Default model identifier
    pub model: String,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Generative backend provider configurations
    pub llm: Option<LlmConfig>,

    /// Router, executor, fuser and synthesizer settings
    pub orchestration: OrchestrationConfig,

    /// Retrieval tools to register (empty means the default three)
    pub tools: Vec<ToolConfig>,

    /// Snapshot locations for the retrieval backends
    pub backends: BackendConfig,

    /// Feedback log settings
    pub feedback: FeedbackConfig,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    Ollama {
        endpoint: String,
        model: String,
        timeout: Option<u64>,
    },
    Extractive {
        #[serde(rename = "snippetChars")]
        snippet_chars: usize,
    },
}

/// Fallback behaviour when every step of a plan fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Answer with the canonical "insufficient evidence" response.
    InsufficientInformation,
    /// Retry once with the best single-tool plan that avoids the failed tools.
    SingleTool,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestrationConfig {
    /// Longest allowed chain of dependent steps
    pub max_chain_depth: usize,

    /// Maximum number of steps in one plan
    pub max_plan_steps: usize,

    /// Per-attempt step timeout in milliseconds
    pub step_timeout_ms: u64,

    /// Backoff before the single retry of a backend failure
    pub retry_backoff_ms: u64,

    /// Score gap below which capabilities count as tied
    pub router_margin: f32,

    /// Evidence records handed to the synthesizer
    pub fusion_top_n: usize,

    /// Passages requested from the vector index
    pub semantic_top_k: usize,

    /// Minimum cosine similarity for a passage to count as a match
    pub similarity_floor: f32,

    /// Row cap for structured queries
    pub max_rows: usize,

    /// Path cap for graph traversals
    pub max_paths: usize,

    /// Hop limit for graph traversals
    pub max_hops: usize,

    /// What to do when a plan fails entirely
    pub fallback_policy: FallbackPolicy,

    /// Capability used when no routing signal is found
    pub default_capability: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: 2,
            max_plan_steps: 4,
            step_timeout_ms: 5_000,
            retry_backoff_ms: 200,
            router_margin: 0.15,
            fusion_top_n: 10,
            semantic_top_k: 5,
            similarity_floor: 0.2,
            max_rows: 50,
            max_paths: 50,
            max_hops: 2,
            fallback_policy: FallbackPolicy::SingleTool,
            default_capability: "semantic".to_string(),
        }
    }
}

impl OrchestrationConfig {
    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_chain_depth == 0 {
            return Err(AppError::Config(
                "maxChainDepth must be at least 1".to_string(),
            ));
        }
        if self.max_plan_steps < self.max_chain_depth {
            return Err(AppError::Config(format!(
                "maxPlanSteps ({}) must be >= maxChainDepth ({})",
                self.max_plan_steps, self.max_chain_depth
            )));
        }
        if self.step_timeout_ms == 0 {
            return Err(AppError::Config("stepTimeoutMs must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.router_margin) {
            return Err(AppError::Config(format!(
                "routerMargin must be within [0, 1], got {}",
                self.router_margin
            )));
        }
        if !(1..=32).contains(&self.fusion_top_n) {
            return Err(AppError::Config(format!(
                "fusionTopN must be within 1..=32, got {}",
                self.fusion_top_n
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err(AppError::Config(format!(
                "similarityFloor must be within [0, 1], got {}",
                self.similarity_floor
            )));
        }
        if self.max_hops == 0 {
            return Err(AppError::Config("maxHops must be at least 1".to_string()));
        }
        let known = ["structured", "semantic", "graph"];
        if !known.contains(&self.default_capability.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown defaultCapability: {}. Supported: {}",
                self.default_capability,
                known.join(", ")
            )));
        }
        Ok(())
    }
}

/// A retrieval tool declared in config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub name: String,

    /// One of "structured", "semantic", "graph"
    pub capability: String,

    #[serde(default)]
    pub description: String,

    /// Extra routing keywords for this tool
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default = "default_cost_hint")]
    pub cost_hint: u32,

    /// Record field whose values feed a chained step
    #[serde(default = "default_binding_field")]
    pub binding_field: String,
}

fn default_cost_hint() -> u32 {
    1
}

fn default_binding_field() -> String {
    "name".to_string()
}

/// Snapshot files for the retrieval backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    pub tables: Option<PathBuf>,
    pub documents: Option<PathBuf>,
    pub graph: Option<PathBuf>,

    /// Dimensions of the document embeddings
    pub embedding_dimensions: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            tables: None,
            documents: None,
            graph: None,
            embedding_dimensions: 384,
        }
    }
}

/// Feedback log settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackConfig {
    pub path: Option<PathBuf>,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    orchestration: Option<OrchestrationConfig>,
    tools: Option<Vec<ToolConfig>>,
    backends: Option<BackendConfig>,
    feedback: Option<FeedbackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "extractive".to_string(), // Offline, deterministic default
            model: "extractive-v1".to_string(),
            log_level: None,
            verbose: false,
            no_color: false,
            log_json: false,
            llm: None,
            orchestration: OrchestrationConfig::default(),
            tools: Vec::new(),
            backends: BackendConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// Environment variables:
    /// - `COMPASS_WORKSPACE`: Override workspace path
    /// - `COMPASS_CONFIG`: Path to config file
    /// - `COMPASS_PROVIDER`: Generative backend provider
    /// - `COMPASS_MODEL`: Model identifier
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with an explicit workspace and config file
    /// taking precedence over `COMPASS_WORKSPACE` and `COMPASS_CONFIG`.
    ///
    /// The workspace must be known before the YAML file is located, so
    /// command-line paths go through here rather than `with_overrides`.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(workspace) =
            workspace.or_else(|| std::env::var("COMPASS_WORKSPACE").ok().map(PathBuf::from))
        {
            config.workspace = workspace;
        }

        config.config_file =
            config_file.or_else(|| std::env::var("COMPASS_CONFIG").ok().map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.compass_dir().join("config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("COMPASS_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("COMPASS_MODEL") {
            config.model = model;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        config.orchestration.validate()?;
        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();

            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = match provider_config {
                    ProviderConfig::Ollama { model, .. } => model.clone(),
                    ProviderConfig::Extractive { .. } => "extractive-v1".to_string(),
                };
            }

            result.llm = Some(llm);
        }

        if let Some(orchestration) = config_file.orchestration {
            result.orchestration = orchestration;
        }
        if let Some(tools) = config_file.tools {
            result.tools = tools;
        }
        if let Some(backends) = config_file.backends {
            result.backends = backends;
        }
        if let Some(feedback) = config_file.feedback {
            result.feedback = feedback;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables
    /// and the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
        log_json: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        if log_json {
            self.log_json = true;
        }

        self
    }

    /// Get the path to the .compass directory.
    pub fn compass_dir(&self) -> PathBuf {
        self.workspace.join(".compass")
    }

    /// Ensure the .compass directory exists.
    pub fn ensure_compass_dir(&self) -> AppResult<()> {
        let compass_dir = self.compass_dir();
        if !compass_dir.exists() {
            std::fs::create_dir_all(&compass_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .compass directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Directory holding prompt overrides.
    pub fn prompts_dir(&self) -> PathBuf {
        self.compass_dir().join("prompts")
    }

    /// Resolve the tables snapshot path.
    pub fn tables_path(&self) -> PathBuf {
        self.resolve_data_path(self.backends.tables.as_deref(), "tables.json")
    }

    /// Resolve the documents snapshot path.
    pub fn documents_path(&self) -> PathBuf {
        self.resolve_data_path(self.backends.documents.as_deref(), "documents.json")
    }

    /// Resolve the graph snapshot path.
    pub fn graph_path(&self) -> PathBuf {
        self.resolve_data_path(self.backends.graph.as_deref(), "graph.json")
    }

    /// Resolve the append-only feedback log path.
    pub fn feedback_path(&self) -> PathBuf {
        match self.feedback.path {
            Some(ref path) if path.is_absolute() => path.clone(),
            Some(ref path) => self.workspace.join(path),
            None => self.compass_dir().join("feedback").join("feedback_log.jsonl"),
        }
    }

    fn resolve_data_path(&self, configured: Option<&Path>, default_name: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.workspace.join(path),
            None => self.compass_dir().join("data").join(default_name),
        }
    }

    /// Get the configuration for a provider, if any.
    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.as_ref().and_then(|llm| llm.providers.get(provider))
    }

    /// Validate configuration for the active provider and orchestration settings.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["ollama", "extractive"];

        if !known_providers.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                known_providers.join(", ")
            )));
        }

        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(AppError::Config("Tool name cannot be empty".to_string()));
            }
        }

        self.orchestration.validate()
    }
}
