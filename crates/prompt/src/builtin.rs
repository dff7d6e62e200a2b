//! Prompts shipped with the binary.

use crate::types::PromptDefinition;

/// Prompt used to synthesize a cited answer from fused evidence.
pub const GROUNDED_ANSWER_PROMPT_ID: &str = "answer.grounded";

const GROUNDED_ANSWER_YAML: &str = r#"
id: answer.grounded
title: Grounded answer with citations
apiVersion: "1.0"
behavior:
  tone: neutral
  style: concise
system: >-
  You answer questions strictly from the numbered evidence you are given.
  Never use outside knowledge. Every factual sentence must end with the
  bracketed marker of the evidence it came from, for example [2].
template: |
  Question: {{question}}

  Evidence:
  {{#each evidence}}
  [{{this.marker}}] {{this.label}}
  {{this.content}}

  {{/each}}
  Answer the question using only the evidence above and cite each claim with its marker.
  If the evidence does not contain the answer, say the information is not available.
  {{#if lowConfidence}}
  The evidence is thin. Say plainly that the answer may be incomplete.
  {{/if}}
output:
  format: text
"#;

/// Look up a built-in prompt definition by ID.
pub fn builtin_prompt(id: &str) -> Option<PromptDefinition> {
    let yaml = match id {
        GROUNDED_ANSWER_PROMPT_ID => GROUNDED_ANSWER_YAML,
        _ => return None,
    };

    match serde_yaml::from_str(yaml) {
        Ok(def) => Some(def),
        Err(e) => {
            tracing::error!("Built-in prompt {} failed to parse: {}", id, e);
            None
        }
    }
}
