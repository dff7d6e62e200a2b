//! Prompt builder for rendering templates.

use crate::types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition};
use compass_core::{AppError, AppResult};
use handlebars::Handlebars;
use serde_json::Value;
use std::collections::BTreeMap;

/// Build a prompt from a definition and template variables.
///
/// Both the template and the optional system message are rendered with the
/// same variables. Missing variables render as empty strings.
///
/// # Example
/// ```no_run
/// use compass_prompt::{build_prompt, builtin_prompt, GROUNDED_ANSWER_PROMPT_ID};
/// use std::collections::BTreeMap;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let def = builtin_prompt(GROUNDED_ANSWER_PROMPT_ID).unwrap();
/// let mut vars = BTreeMap::new();
/// vars.insert("question".to_string(), serde_json::json!("Who is high risk?"));
/// vars.insert("evidence".to_string(), serde_json::json!([]));
///
/// let built = build_prompt(&def, &vars)?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(
    definition: &PromptDefinition,
    variables: &BTreeMap<String, Value>,
) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building prompt: {}", definition.id);

    let user = render_template(&definition.template, variables)?;
    let system = match &definition.system {
        Some(system) => Some(render_template(system, variables)?.trim().to_string()),
        None => None,
    };

    Ok(BuiltPrompt {
        system,
        user,
        metadata: BuiltPromptMetadata {
            source_prompt_id: definition.id.clone(),
            resolved_variables: variables.keys().cloned().collect(),
        },
    })
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &BTreeMap<String, Value>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    let rendered = handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered)
}
