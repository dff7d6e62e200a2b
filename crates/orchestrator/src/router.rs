//! Query routing: question text → validated [`Plan`].
//!
//! The router scores each capability with an [`IntentScorer`], picks one
//! tool per question segment and chains segments joined by sequential
//! connectors ("then", "and then"). Segments joined by "and also" run as
//! independent branches. Routing is a pure function of the query text and
//! the registry snapshot.

use crate::adapter::structured::{find_comparisons, has_superlative};
use crate::error::ValidationError;
use crate::plan::{Plan, Step};
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::text::contains_phrase;
use crate::types::{Capability, Query};
use compass_core::OrchestrationConfig;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SEQUENTIAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:[,;]\s*)?\b(?:and\s+)?then\b\s*").ok());

static PARALLEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\s*,?\s*\band\s+also\b\s*").ok());

const STRUCTURED_KEYWORDS: &[&str] = &[
    "list", "count", "how many", "total", "sum", "average", "revenue", "amount", "number of",
    "table", "rows", "records", "highest", "lowest", "top",
];

const GRAPH_KEYWORDS: &[&str] = &[
    "relationship", "relationships", "between", "connected", "connection", "linked", "related to",
    "path", "network", "depends on", "dependency",
];

const SEMANTIC_KEYWORDS: &[&str] = &[
    "what did", "say", "said", "summarize", "summary", "email", "emails", "assessment", "report",
    "memo", "document", "documents", "mention", "describe", "explain", "why", "notes",
];

/// Relevance of a question segment to one capability, in [0, 1].
pub trait IntentScorer: Send + Sync {
    fn score(&self, text: &str, capability: Capability, tools: &[&ToolDescriptor]) -> f32;
}

/// Deterministic keyword scorer: `hits / (hits + 1)` over the capability's
/// built-in vocabulary plus the keywords of its registered tools.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    vocabulary: BTreeMap<Capability, Vec<String>>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        let to_vec = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        let mut vocabulary = BTreeMap::new();
        vocabulary.insert(Capability::Structured, to_vec(STRUCTURED_KEYWORDS));
        vocabulary.insert(Capability::Graph, to_vec(GRAPH_KEYWORDS));
        vocabulary.insert(Capability::Semantic, to_vec(SEMANTIC_KEYWORDS));
        Self { vocabulary }
    }
}

impl KeywordScorer {
    pub fn new(vocabulary: BTreeMap<Capability, Vec<String>>) -> Self {
        Self { vocabulary }
    }

    /// Distinct keywords of `capability` found in `text`.
    pub fn hits(&self, text: &str, capability: Capability, tools: &[&ToolDescriptor]) -> usize {
        let mut keywords: Vec<String> = self
            .vocabulary
            .get(&capability)
            .into_iter()
            .flatten()
            .chain(tools.iter().flat_map(|t| t.keywords.iter()))
            .map(|k| k.to_lowercase())
            .collect();
        keywords.sort();
        keywords.dedup();

        let mut hits = keywords.iter().filter(|k| contains_phrase(text, k)).count();
        if capability == Capability::Structured {
            if !find_comparisons(text).is_empty() {
                hits += 1;
            }
            if has_superlative(text) {
                hits += 1;
            }
        }
        hits
    }
}

impl IntentScorer for KeywordScorer {
    fn score(&self, text: &str, capability: Capability, tools: &[&ToolDescriptor]) -> f32 {
        let hits = self.hits(text, capability, tools) as f32;
        hits / (hits + 1.0)
    }
}

/// Per-capability scores of one question segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityScores {
    scores: BTreeMap<Capability, f32>,
}

impl CapabilityScores {
    pub fn get(&self, capability: Capability) -> f32 {
        self.scores.get(&capability).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, f32)> + '_ {
        self.scores.iter().map(|(c, s)| (*c, *s))
    }

    /// Highest score, ties resolved by capability priority.
    pub fn best(&self) -> Option<(Capability, f32)> {
        self.iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }
}

pub struct QueryRouter {
    margin: f32,
    max_depth: usize,
    max_steps: usize,
    default_capability: Capability,
    scorer: Box<dyn IntentScorer>,
}

impl QueryRouter {
    pub fn new(config: &OrchestrationConfig) -> Self {
        Self {
            margin: config.router_margin,
            max_depth: config.max_chain_depth,
            max_steps: config.max_plan_steps,
            default_capability: Capability::parse(&config.default_capability)
                .unwrap_or(Capability::Semantic),
            scorer: Box::new(KeywordScorer::default()),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn IntentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Score every capability that has at least one registered tool.
    pub fn scores(&self, text: &str, registry: &ToolRegistry) -> CapabilityScores {
        let scores = Capability::ALL
            .iter()
            .filter_map(|&capability| {
                let tools = registry.with_capability(capability);
                if tools.is_empty() {
                    return None;
                }
                Some((capability, self.scorer.score(text, capability, &tools)))
            })
            .collect();
        CapabilityScores { scores }
    }

    /// Build and validate the plan for `query`.
    pub fn route(&self, query: &Query, registry: &ToolRegistry) -> Result<Plan, ValidationError> {
        if registry.is_empty() {
            return Err(ValidationError::NoTools);
        }

        let mut steps: Vec<Step> = Vec::new();
        for branch in split_parallel(query.text()) {
            let mut previous: Option<(usize, String)> = None;
            for segment in split_sequential(&branch) {
                let tool = self.select_tool(&segment, registry)?;
                let step = match previous.take() {
                    Some((dep, field)) => Step::bound(tool.name.clone(), dep, field, segment),
                    None => Step::literal(tool.name.clone(), segment),
                };
                previous = Some((steps.len(), tool.output_schema.binding_field.clone()));
                steps.push(step);
            }
        }

        let plan = Plan::new(steps);
        plan.validate(registry, self.max_depth, self.max_steps)?;

        tracing::info!(
            request_id = %query.request_id(),
            steps = plan.len(),
            depth = plan.depth(),
            tools = ?plan.tools(),
            "Routed query"
        );
        Ok(plan)
    }

    /// Best single-tool plan for the whole question that avoids `excluded`.
    pub fn fallback_plan(
        &self,
        query: &Query,
        registry: &ToolRegistry,
        excluded: &[String],
    ) -> Option<Plan> {
        let scores = self.scores(query.text(), registry);
        let mut ranked: Vec<(Capability, f32)> = scores.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        ranked.into_iter().find_map(|(capability, _)| {
            let tools: Vec<&ToolDescriptor> = registry
                .with_capability(capability)
                .into_iter()
                .filter(|t| !excluded.contains(&t.name))
                .collect();
            self.rank_tools(query.text(), &tools)
                .map(|tool| Plan::single(tool.name.clone(), query.text()))
        })
    }

    fn select_tool<'a>(
        &self,
        text: &str,
        registry: &'a ToolRegistry,
    ) -> Result<&'a ToolDescriptor, ValidationError> {
        let scores = self.scores(text, registry);
        let capability = self.select_capability(&scores);
        tracing::debug!(segment = text, scores = ?scores, selected = ?capability, "Scored segment");

        capability
            .and_then(|c| self.rank_tools(text, &registry.with_capability(c)))
            .ok_or(ValidationError::NoTools)
    }

    /// Dominant capability, or the most constrained one among those within
    /// the margin of the top score.
    fn select_capability(&self, scores: &CapabilityScores) -> Option<Capability> {
        let (_, top) = scores.best()?;
        if top <= 0.0 {
            if scores.scores.contains_key(&self.default_capability) {
                return Some(self.default_capability);
            }
            return scores.iter().map(|(c, _)| c).min();
        }

        scores
            .iter()
            .filter(|(_, score)| *score > 0.0 && top - *score <= self.margin)
            .map(|(c, _)| c)
            .min()
    }

    /// Most specific tool first, then cheapest, then by name.
    fn rank_tools<'a>(&self, text: &str, tools: &[&'a ToolDescriptor]) -> Option<&'a ToolDescriptor> {
        tools
            .iter()
            .map(|tool| {
                let hits = tool.keywords.iter().filter(|k| contains_phrase(text, k)).count();
                (hits, *tool)
            })
            .min_by(|(ha, a), (hb, b)| {
                hb.cmp(ha)
                    .then_with(|| a.cost_hint.cmp(&b.cost_hint))
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|(_, tool)| tool)
    }
}

fn clean_segment(segment: &str) -> String {
    segment
        .trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .to_string()
}

fn split_on(re: Option<&Regex>, text: &str) -> Vec<String> {
    let parts: Vec<String> = match re {
        Some(re) => re.split(text).map(clean_segment).collect(),
        None => vec![clean_segment(text)],
    };
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

fn split_parallel(text: &str) -> Vec<String> {
    split_on(PARALLEL.as_ref(), text)
}

fn split_sequential(text: &str) -> Vec<String> {
    split_on(SEQUENTIAL.as_ref(), text)
}
