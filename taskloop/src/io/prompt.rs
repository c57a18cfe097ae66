//! Instruction templates handed to the agent on stdin.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const SPECS_TEMPLATE: &str = include_str!("prompts/specs.md");
const PROJECT_TEMPLATE: &str = include_str!("prompts/project.md");

/// Which instruction to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Implement one spec file.
    Spec,
    /// Pick and implement the next tracker issue of a project.
    Project,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            Self::Spec => "specs",
            Self::Project => "project",
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("specs", SPECS_TEMPLATE)
            .expect("specs template should be valid");
        env.add_template("project", PROJECT_TEMPLATE)
            .expect("project template should be valid");
        Self { env }
    }

    /// Render the instruction for `item` with the marker phrases spelled out.
    pub fn render(
        &self,
        kind: PromptKind,
        item: &str,
        magic_phrase: &str,
        no_work_phrase: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template(kind.template_name())?;
        let mut rendered = template
            .render(context! {
                item => item,
                magic_phrase => magic_phrase,
                no_work_phrase => no_work_phrase,
            })
            .with_context(|| format!("render {} prompt", kind.template_name()))?;
        rendered.push('\n');
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
