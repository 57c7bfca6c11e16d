//! Oracle abstraction: the reasoning backend consulted once per step.
//!
//! The [`Oracle`] trait decouples the step engine from the model provider.
//! Tests use scripted oracles that return predetermined replies.

pub mod openai;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::{ToolCall, TranscriptEntry};
use crate::tools::ToolSchema;

const BASE_SYSTEM_TEMPLATE: &str = include_str!("prompts/base_system.md");

/// What the oracle produced for one consultation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleReply {
    /// Natural-language assistant messages, in order.
    pub messages: Vec<String>,
    /// Requested tool calls; call ids are unique within the reply.
    pub tool_calls: Vec<ToolCall>,
}

/// Reasoning backend. Errors are systemic (network, protocol) and end the run
/// as `failed`; they are never retried here.
pub trait Oracle: Send + Sync {
    fn consult(&self, transcript: &[TranscriptEntry], tools: &[ToolSchema]) -> Result<OracleReply>;
}

/// Render the system instructions sent alongside every consultation.
pub fn render_instructions(tool_names: &[String], extra_instructions: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("base_system", BASE_SYSTEM_TEMPLATE)?;
    let rendered = env.get_template("base_system")?.render(context! {
        tools => tool_names,
        extra_instructions => Some(extra_instructions.trim()).filter(|s| !s.is_empty()),
    })?;
    Ok(rendered)
}
