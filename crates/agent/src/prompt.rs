//! System prompt variants.

use lyra_config::AgentConfig;

/// Placeholder in the tool instructions replaced by the tool names.
const TOOLS_PLACEHOLDER: &str = "{tools}";

/// Builds the persona-only and tool-enabled system prompts.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    persona: String,
    tool_instructions: String,
}

impl SystemPrompt {
    pub fn new(persona: impl Into<String>, tool_instructions: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            tool_instructions: tool_instructions.into(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.persona.clone(), config.tool_instructions.clone())
    }

    /// The persona alone, used when tools are not offered.
    pub fn persona_only(&self) -> String {
        self.persona.clone()
    }

    /// The persona followed by tool-use instructions naming `tool_names`.
    pub fn with_tools(&self, tool_names: &[&str]) -> String {
        let instructions = self
            .tool_instructions
            .replace(TOOLS_PLACEHOLDER, &tool_names.join(", "));
        format!("{}{}", self.persona, instructions)
    }

    /// Pick the variant for this turn.
    pub fn variant(&self, tools_enabled: bool, tool_names: &[&str]) -> String {
        if tools_enabled {
            self.with_tools(tool_names)
        } else {
            self.persona_only()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_variant_lists_names_in_order() {
        let prompt = SystemPrompt::new("You are Lyra.", " Use {tools}.");
        assert_eq!(
            prompt.with_tools(&["dataStoreSearch", "evaluateMathExpression"]),
            "You are Lyra. Use dataStoreSearch, evaluateMathExpression."
        );
    }

    #[test]
    fn variant_switches_on_tool_support() {
        let prompt = SystemPrompt::new("P", " T:{tools}");
        assert_eq!(prompt.variant(false, &["a"]), "P");
        assert_eq!(prompt.variant(true, &["a", "b"]), "P T:a, b");
    }

    #[test]
    fn default_instructions_mention_final_marker() {
        let prompt = SystemPrompt::from_config(&AgentConfig::default());
        let text = prompt.with_tools(&["dataStoreSearch"]);
        assert!(text.starts_with(&AgentConfig::default().persona));
        assert!(text.contains("</final_output>"));
        assert!(text.contains("following tools: dataStoreSearch,"));
        assert!(!text.contains("{tools}"));
    }
}
