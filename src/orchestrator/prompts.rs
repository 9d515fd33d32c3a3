//! Role prompt builder for subagent invocations.
//!
//! Roles are disambiguated by the template, not by output types: every
//! template demands a JSON-only reply with the keys the quality gate will
//! check for that role.

use anyhow::Result;
use minijinja::{context, Environment};
use serde_json::Value;

use super::AgentRole;

const ORCHESTRATOR_TEMPLATE: &str = include_str!("prompts/orchestrator.md");
const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");
const FRONTIER_TEMPLATE: &str = include_str!("prompts/frontier.md");

/// Inputs for rendering one role prompt.
#[derive(Debug)]
pub struct PromptContext<'a> {
    pub agent_name: &'a str,
    pub run_id: &'a str,
    pub depth: u32,
    pub input: &'a Value,
    /// Correction appended after a failed gate attempt.
    pub tightening: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("orchestrator", ORCHESTRATOR_TEMPLATE)
            .expect("orchestrator template should be valid");
        env.add_template("worker", WORKER_TEMPLATE)
            .expect("worker template should be valid");
        env.add_template("frontier", FRONTIER_TEMPLATE)
            .expect("frontier template should be valid");
        Self { env }
    }

    pub fn render(&self, role: AgentRole, ctx: &PromptContext<'_>) -> Result<String> {
        let template = self.env.get_template(role.template_name())?;
        let input_json = serde_json::to_string_pretty(ctx.input)?;
        let rendered = template.render(context! {
            agent_name => ctx.agent_name,
            run_id => ctx.run_id,
            depth => ctx.depth,
            input_json => input_json,
            tightening => ctx.tightening,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
