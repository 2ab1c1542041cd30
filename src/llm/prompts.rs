// RLM-Agent: Prompt templates
// {{var}} templates rendered with explicit variables

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static TEMPLATE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("template variable pattern is valid"));

/// Prompt template with variable substitution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub template: String,
    pub required_vars: Vec<String>,
}

impl PromptTemplate {
    pub fn new(name: &str, template: &str) -> Self {
        let mut required_vars: Vec<String> = Vec::new();
        for capture in TEMPLATE_VAR.captures_iter(template) {
            let var = capture[1].to_string();
            if !required_vars.contains(&var) {
                required_vars.push(var);
            }
        }

        Self {
            name: name.to_string(),
            template: template.to_string(),
            required_vars,
        }
    }

    /// Render the template with provided variables
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String, String> {
        let mut result = self.template.clone();

        for var in &self.required_vars {
            let placeholder = format!("{{{{{}}}}}", var);
            let value = vars.get(var)
                .ok_or_else(|| format!("Missing required variable '{}' in template '{}'", var, self.name))?;
            result = result.replace(&placeholder, value);
        }

        Ok(result)
    }
}

/// Built-in system prompts
pub struct SystemPrompts;

impl SystemPrompts {
    /// Raw RLM system prompt template
    pub fn rlm_template() -> PromptTemplate {
        PromptTemplate::new("rlm_system", include_str!("../../prompts/rlm_system.md"))
    }

    /// Render the RLM preamble for a fence tag, capability listing and finishing instructions
    pub fn rlm_preamble(fence_tag: &str, capabilities: &str, termination: &str) -> Result<String, String> {
        let mut vars = HashMap::new();
        vars.insert("fence_tag".to_string(), fence_tag.to_string());
        vars.insert("capabilities".to_string(), capabilities.to_string());
        vars.insert("termination".to_string(), termination.to_string());
        Self::rlm_template().render(&vars)
    }

    /// Annotation appended to the preamble so the model knows where it sits in the recursion tree
    pub fn depth_annotation(depth: usize, max_depth: usize) -> String {
        if depth < max_depth {
            format!("Depth: {}/{}", depth, max_depth)
        } else {
            format!("Depth: {}/{} (query() is unavailable at this depth)", depth, max_depth)
        }
    }
}
