//! Reserved capabilities handled by the step engine itself.

use serde_json::{Value, json};

/// Name of the built-in capability that suspends the run for a human answer.
pub const ASK_HUMAN: &str = "ask_human";
/// Name of the built-in capability that completes the run.
pub const FINAL_ANSWER: &str = "final_answer";

/// What a tool-call name dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    UserTool(String),
    AskHuman,
    FinalAnswer,
}

impl Capability {
    pub fn resolve(name: &str) -> Self {
        match name {
            ASK_HUMAN => Capability::AskHuman,
            FINAL_ANSWER => Capability::FinalAnswer,
            other => Capability::UserTool(other.to_string()),
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        !matches!(Capability::resolve(name), Capability::UserTool(_))
    }
}

/// Schema for the `final_answer` capability.
pub fn final_answer_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "answer": {"type": "string", "description": "The final answer for the user."}
        },
        "required": ["answer"],
        "additionalProperties": false
    })
}

/// Schema for the `ask_human` capability.
pub fn ask_human_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {"type": "string", "description": "The question or prompt to ask the user"}
        },
        "required": ["question"],
        "additionalProperties": false
    })
}
