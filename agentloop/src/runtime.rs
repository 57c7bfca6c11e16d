//! Wiring from configuration to a ready coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::coordinator::RunCoordinator;
use crate::io::config::AgentConfig;
use crate::io::file_store::FileStore;
use crate::oracle::openai::OpenAiOracle;
use crate::oracle::render_instructions;
use crate::tools::math::math_registry;

/// File-backed coordinator using the configured OpenAI oracle and the math
/// tool set.
///
/// Builds a blocking HTTP client, so call it outside any async runtime.
pub fn build_coordinator(cfg: &AgentConfig) -> Result<RunCoordinator> {
    cfg.validate()?;
    let registry = math_registry().context("register tools")?;
    let instructions = render_instructions(&registry.names(), &cfg.oracle.extra_instructions)?;
    let oracle = OpenAiOracle::from_config(&cfg.oracle, instructions)?;
    let store = FileStore::new(cfg.store_dir.clone())
        .with_claim_ttl(Duration::from_secs(cfg.claim_ttl_secs));
    info!(
        store = %cfg.store_dir.display(),
        model = %cfg.oracle.model,
        tools = registry.len(),
        max_steps = cfg.max_steps,
        claim_ttl_secs = cfg.claim_ttl_secs,
        "coordinator ready"
    );
    Ok(RunCoordinator::new(
        Arc::new(store),
        Arc::new(oracle),
        Arc::new(registry),
        cfg.max_steps,
    ))
}
