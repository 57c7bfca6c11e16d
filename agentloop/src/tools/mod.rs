//! Tool registry: name lookup plus the schema list offered to the oracle.
//!
//! Tools are invoked with a keyword-argument map and return a JSON value or a
//! failure. The registry never lets a tool failure escape: errors, unknown
//! names and panics all become `"Error: ..."` result payloads.

pub mod math;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

use anyhow::{Result, anyhow, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::capability::{
    ASK_HUMAN, Capability, FINAL_ANSWER, ask_human_parameters, final_answer_parameters,
};

static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// A capability the oracle can ask the engine to invoke.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema (type `object`) for the keyword arguments.
    fn parameters(&self) -> Value;
    fn invoke(&self, args: &Map<String, Value>) -> Result<Value>;
}

/// Function declaration sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Dispatch target, resolved once when the schema list is built.
    #[serde(skip)]
    pub capability: Capability,
}

impl ToolSchema {
    fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function",
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            capability: Capability::resolve(name),
        }
    }
}

/// Registry of user tools. Shared read-only across concurrent runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool after checking its name and parameter schema shape.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if Capability::is_reserved(&name) {
            bail!("tool name '{name}' is reserved");
        }
        if !TOOL_NAME_RE.is_match(&name) {
            bail!("tool name '{name}' must match {}", TOOL_NAME_RE.as_str());
        }
        if self.tools.contains_key(&name) {
            bail!("tool '{name}' is already registered");
        }
        check_parameters_shape(&name, &tool.parameters())?;
        debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every registered tool (sorted by name), then the two
    /// reserved capabilities.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSchema::function(tool.name(), tool.description(), tool.parameters()))
            .collect();
        schemas.push(ToolSchema::function(
            FINAL_ANSWER,
            "Provide the final answer and stop.",
            final_answer_parameters(),
        ));
        schemas.push(ToolSchema::function(
            ASK_HUMAN,
            "Ask the user for clarification or additional information.",
            ask_human_parameters(),
        ));
        schemas
    }

    /// Invoke a user tool by name and return the value to record as its output.
    ///
    /// Never fails: unknown tools, tool errors and panics are folded into an
    /// `"Error: ..."` string.
    pub fn invoke(&self, name: &str, args: &Map<String, Value>) -> Value {
        let Some(tool) = self.resolve(name) else {
            warn!(tool = %name, "tool not found");
            return Value::String(format!("Error: Tool {name} not found"));
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| tool.invoke(args)))
            .unwrap_or_else(|payload| Err(anyhow!("tool panicked: {}", panic_message(&*payload))));
        match outcome {
            Ok(value) => value,
            Err(err) => {
                warn!(tool = %name, error = %err, "tool failed");
                Value::String(format!("Error: {err}"))
            }
        }
    }
}

fn check_parameters_shape(name: &str, parameters: &Value) -> Result<()> {
    if parameters.get("type").and_then(Value::as_str) != Some("object") {
        bail!("tool '{name}' parameters must be a JSON Schema of type \"object\"");
    }
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(parameters)
        .map_err(|err| anyhow!("tool '{name}' parameters are not a valid schema: {err}"))?;
    Ok(())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
