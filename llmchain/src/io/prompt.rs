//! Prompt rendering for link invocations.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::LinkRole;

const LINK_TEMPLATE: &str = include_str!("prompts/link.md");

/// Inputs for one link prompt.
#[derive(Debug, Clone)]
pub struct LinkPromptInputs<'a> {
    pub chain: &'a str,
    pub link: &'a str,
    pub role: LinkRole,
    pub description: &'a str,
    pub round: u64,
    pub until_full: bool,
    /// Where the agent finds the shared handoff.
    pub handoff_path: &'a str,
    /// The chain author's prompt text.
    pub prompt: &'a str,
}

/// Wrap the author's prompt with chain context.
pub fn render_link_prompt(input: &LinkPromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("link", LINK_TEMPLATE)
        .context("load link template")?;
    let template = env.get_template("link")?;
    let rendered = template
        .render(context! {
            chain => input.chain,
            link => input.link,
            role => input.role.as_str(),
            description => (!input.description.trim().is_empty()).then(|| input.description.trim()),
            round => input.round,
            // Only workers keep going until capacity is exhausted.
            until_full => input.until_full && input.role == LinkRole::Worker,
            handoff_path => input.handoff_path,
            prompt => input.prompt.trim(),
        })
        .with_context(|| format!("render prompt for link {}", input.link))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(role: LinkRole, until_full: bool) -> LinkPromptInputs<'static> {
        LinkPromptInputs {
            chain: "demo",
            link: "opus-worker",
            role,
            description: "",
            round: 3,
            until_full,
            handoff_path: "state/demo/handoff.md",
            prompt: "  Fix the failing tests.\n",
        }
    }

    #[test]
    fn template_uses_xml_tags() {
        let content = render_link_prompt(&inputs(LinkRole::Worker, false)).expect("render");
        for tag in ["chain", "handoff", "task"] {
            assert!(content.contains(&format!("<{tag}>")), "missing <{tag}>");
            assert!(content.contains(&format!("</{tag}>")), "missing </{tag}>");
        }
        assert!(content.contains("Link: opus-worker (worker)"));
        assert!(content.contains("Round: 3"));
        assert!(content.contains("state/demo/handoff.md"));
        assert!(content.contains("<task>\nFix the failing tests.\n</task>"));
        assert!(!content.contains("Description:"));
    }

    #[test]
    fn until_full_applies_to_workers_only() {
        let worker = render_link_prompt(&inputs(LinkRole::Worker, true)).expect("render");
        assert!(worker.contains("<pace>"));

        let reviewer = render_link_prompt(&inputs(LinkRole::Reviewer, true)).expect("render");
        assert!(!reviewer.contains("<pace>"));
    }
}
