// ABOUTME: Renders an agent's instruction template into the system prompt.
// ABOUTME: Fills the {{name}}, {{task}}, {{tools}} and {{managed_agents}} placeholders.

use crate::dispatch::AgentSpec;
use crate::tool::Toolbox;

const DEFAULT_INSTRUCTIONS: &str = "You are {{name}}, an agent that solves tasks step by step using tools.

You can use these tools:
{{tools}}

You can delegate sub-tasks to these agents, calling them like tools with a `task` argument:
{{managed_agents}}

Call one tool at a time. When you know the answer, call `final_answer`.

Task: {{task}}";

/// Fill the template's `{{name}}`, `{{task}}`, `{{tools}}` and
/// `{{managed_agents}}` placeholders. Empty instructions use a default template.
pub fn render_system_prompt(spec: &AgentSpec, task: &str, toolbox: &Toolbox) -> String {
    let template = if spec.instructions.trim().is_empty() {
        DEFAULT_INSTRUCTIONS
    } else {
        spec.instructions.as_str()
    };

    let or_none = |lines: Vec<String>| {
        if lines.is_empty() {
            "(none)".to_string()
        } else {
            lines.join("\n")
        }
    };

    template
        .replace("{{name}}", &spec.name)
        .replace("{{tools}}", &or_none(toolbox.tool_lines()))
        .replace("{{managed_agents}}", &or_none(toolbox.managed_agent_lines()))
        .replace("{{task}}", task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Registry;

    #[test]
    fn test_custom_template_placeholders() {
        let spec = AgentSpec::new("analyst", "m").instructions("I am {{name}}. Do: {{task}}");
        let toolbox = Toolbox::new(Registry::default(), vec![], vec![]);

        assert_eq!(
            render_system_prompt(&spec, "count", &toolbox),
            "I am analyst. Do: count"
        );
    }

    #[test]
    fn test_default_template_lists_none() {
        let spec = AgentSpec::new("general_agent", "m");
        let toolbox = Toolbox::new(Registry::default(), vec!["missing".into()], vec![]);
        let prompt = render_system_prompt(&spec, "hi", &toolbox);

        assert!(prompt.starts_with("You are general_agent"));
        assert!(prompt.contains("(none)"));
        assert!(prompt.ends_with("Task: hi"));
    }
}
