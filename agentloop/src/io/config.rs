//! Configuration stored under `.agentloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::file_store::DEFAULT_CLAIM_TTL;

/// Default config location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".agentloop/config.toml";

/// Top-level configuration (TOML).
///
/// Missing fields default to sensible values so a partial file stays valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Step allowance granted to every loop invocation (fresh or resumed).
    pub max_steps: u32,

    /// Directory holding one JSON checkpoint per run.
    pub store_dir: PathBuf,

    /// Seconds after which an execution claim whose holder stopped saving
    /// may be taken over. Must exceed the oracle timeout.
    pub claim_ttl_secs: u64,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the Responses API (without `/responses`).
    pub base_url: String,
    pub model: String,
    /// Sent as `reasoning.effort` for reasoning models; empty disables it.
    pub reasoning_effort: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Appended to the base system instructions.
    pub extra_instructions: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-5".to_string(),
            reasoning_effort: "low".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            extra_instructions: String::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            store_dir: PathBuf::from(".agentloop/runs"),
            claim_ttl_secs: DEFAULT_CLAIM_TTL.as_secs(),
            oracle: OracleConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(anyhow!("store_dir must not be empty"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.claim_ttl_secs <= self.oracle.timeout_secs {
            return Err(anyhow!(
                "claim_ttl_secs ({}) must exceed oracle.timeout_secs ({})",
                self.claim_ttl_secs,
                self.oracle.timeout_secs
            ));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(anyhow!("oracle.model must not be empty"));
        }
        if !self.oracle.base_url.starts_with("http://")
            && !self.oracle.base_url.starts_with("https://")
        {
            return Err(anyhow!("oracle.base_url must be an http(s) URL"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
