//! Plans: validated, acyclic sequences of tool invocations.

use crate::error::ValidationError;
use crate::registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a step gets its sub-query from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputBinding {
    /// Run with fixed text.
    Literal { text: String },
    /// Run with `instruction`, bound to the values of `field` in the records
    /// of an earlier step.
    #[serde(rename_all = "camelCase")]
    StepOutput {
        step: usize,
        field: String,
        instruction: String,
    },
}

impl InputBinding {
    pub fn literal(text: impl Into<String>) -> Self {
        InputBinding::Literal { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            InputBinding::Literal { text } => text,
            InputBinding::StepOutput { instruction, .. } => instruction,
        }
    }

    pub fn dependency(&self) -> Option<usize> {
        match self {
            InputBinding::Literal { .. } => None,
            InputBinding::StepOutput { step, .. } => Some(*step),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub tool: String,
    pub binding: InputBinding,
    /// A failure of an optional step does not degrade the answer
    #[serde(default)]
    pub optional: bool,
}

impl Step {
    pub fn literal(tool: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            binding: InputBinding::literal(text),
            optional: false,
        }
    }

    pub fn bound(
        tool: impl Into<String>,
        step: usize,
        field: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            binding: InputBinding::StepOutput {
                step,
                field: field.into(),
                instruction: instruction.into(),
            },
            optional: false,
        }
    }
}

/// Ordered steps. A step may only bind to an earlier step, which keeps every
/// plan acyclic by construction once validated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn single(tool: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::literal(tool, text)],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn dependency(&self, index: usize) -> Option<usize> {
        self.steps.get(index).and_then(|s| s.binding.dependency())
    }

    /// Length of the longest dependency chain. Assumes bindings only point
    /// backwards; forward references count as depth 1.
    pub fn depth(&self) -> usize {
        let mut depths: Vec<usize> = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            let depth = match step.binding.dependency() {
                Some(dep) if dep < i => depths[dep] + 1,
                _ => 1,
            };
            depths.push(depth);
        }
        depths.into_iter().max().unwrap_or(0)
    }

    /// Distinct tool names in step order.
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !tools.contains(&step.tool.as_str()) {
                tools.push(&step.tool);
            }
        }
        tools
    }

    /// Check the plan against a registry snapshot and the configured bounds.
    pub fn validate(
        &self,
        registry: &ToolRegistry,
        max_depth: usize,
        max_steps: usize,
    ) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }
        if self.steps.len() > max_steps {
            return Err(ValidationError::TooManySteps {
                steps: self.steps.len(),
                max: max_steps,
            });
        }

        for (i, step) in self.steps.iter().enumerate() {
            if !registry.contains(&step.tool) {
                return Err(ValidationError::UnknownTool {
                    step: i,
                    tool: step.tool.clone(),
                });
            }
            if let Some(target) = step.binding.dependency() {
                if target >= i {
                    return Err(ValidationError::ForwardReference { step: i, target });
                }
            }
        }

        let depth = self.depth();
        if depth > max_depth {
            return Err(ValidationError::DepthExceeded {
                depth,
                max: max_depth,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}. {}", i + 1, step.tool)?;
            match &step.binding {
                InputBinding::Literal { text } => write!(f, " \"{}\"", text)?,
                InputBinding::StepOutput {
                    step: dep,
                    field,
                    instruction,
                } => write!(f, " \"{}\" <- step {}.{}", instruction, dep + 1, field)?,
            }
            if step.optional {
                write!(f, " (optional)")?;
            }
        }
        Ok(())
    }
}
