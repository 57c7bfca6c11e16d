//! Oracle backed by the OpenAI Responses API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::core::types::{ToolCall, TranscriptEntry};
use crate::io::config::OracleConfig;
use crate::oracle::{Oracle, OracleReply};
use crate::tools::ToolSchema;

/// Blocking Responses API client. One instance is shared by all workers.
pub struct OpenAiOracle {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    reasoning_effort: Option<String>,
    instructions: String,
}

impl OpenAiOracle {
    /// Build the client from config; the API key is read from the configured
    /// environment variable.
    pub fn from_config(cfg: &OracleConfig, instructions: String) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("read API key from ${}", cfg.api_key_env))?;
        Self::new(cfg, api_key, instructions)
    }

    pub fn new(cfg: &OracleConfig, api_key: String, instructions: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build HTTP client")?;
        let reasoning_effort = (cfg.model.starts_with("gpt-5") || cfg.model.starts_with('o'))
            .then(|| cfg.reasoning_effort.clone())
            .filter(|effort| !effort.is_empty());
        Ok(Self {
            client,
            endpoint: format!("{}/responses", cfg.base_url.trim_end_matches('/')),
            api_key,
            model: cfg.model.clone(),
            reasoning_effort,
            instructions,
        })
    }

    fn request_body(&self, transcript: &[TranscriptEntry], tools: &[ToolSchema]) -> Value {
        let mut body = json!({
            "model": self.model,
            "instructions": self.instructions,
            "input": transcript,
            "tools": tools,
        });
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        body
    }
}

impl Oracle for OpenAiOracle {
    #[instrument(skip_all, fields(model = %self.model, entries = transcript.len()))]
    fn consult(&self, transcript: &[TranscriptEntry], tools: &[ToolSchema]) -> Result<OracleReply> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(transcript, tools))
            .send()
            .context("send responses request")?;

        let status = response.status();
        let body = response.text().context("read responses body")?;
        if !status.is_success() {
            bail!("oracle returned {}: {}", status.as_u16(), body);
        }
        let reply = parse_response(&body)?;
        debug!(
            messages = reply.messages.len(),
            tool_calls = reply.tool_calls.len(),
            "oracle replied"
        );
        Ok(reply)
    }
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Parse a Responses API body into messages and tool calls.
pub fn parse_response(body: &str) -> Result<OracleReply> {
    let parsed: ResponseBody = serde_json::from_str(body).context("parse responses body")?;
    let mut reply = OracleReply::default();
    for item in parsed.output {
        match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let arguments = parse_arguments(&name, &arguments)?;
                reply.tool_calls.push(ToolCall {
                    call_id,
                    name,
                    arguments,
                });
            }
            OutputItem::Message { content } => {
                let text: String = content
                    .into_iter()
                    .filter(|part| part.kind == "output_text")
                    .map(|part| part.text)
                    .collect();
                if !text.is_empty() {
                    reply.messages.push(text);
                }
            }
            OutputItem::Other => {}
        }
    }
    Ok(reply)
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(anyhow!("arguments for '{name}' are not an object: {other}")),
        Err(err) => Err(anyhow!("malformed arguments for '{name}': {err}")),
    }
}
