//! `agentloop` command line.
//!
//! Launches runs against the configured oracle, answers `ask_human`
//! questions from the terminal, and restarts stopped runs. Checkpoints live
//! under the configured store directory (`.agentloop/runs` by default).

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use agentloop::coordinator::{CoordinatorError, RunCoordinator, StartedRun};
use agentloop::core::types::{RunState, RunStatus};
use agentloop::exit_codes;
use agentloop::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use agentloop::io::file_store::FileStore;
use agentloop::io::store::CheckpointStore;
use agentloop::logging;
use agentloop::runtime::build_coordinator;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agentloop",
    version,
    about = "Resumable, checkpointed agent loop"
)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file and create the run store directory.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Launch a run and wait for it to stop.
    Run {
        prompt: String,
        /// Override the configured step allowance.
        #[arg(long)]
        max_steps: Option<u32>,
        /// Stop at the first question instead of reading answers from stdin.
        #[arg(long)]
        detach: bool,
    },
    /// Print the last checkpoint of a run as JSON.
    State { id: String },
    /// Restart a run that hit its step limit or failed.
    Resume {
        id: String,
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Answer the question a suspended run is waiting on.
    Answer { id: String, answer: String },
    /// Restart a run left `running` by a worker that died.
    Recover { id: String },
}

fn main() {
    logging::init("warn");
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            match err.downcast_ref::<CoordinatorError>() {
                Some(CoordinatorError::Conflict(_)) => exit_codes::CONFLICT,
                _ => exit_codes::INVALID,
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            prompt,
            max_steps,
            detach,
        } => {
            let coordinator = coordinator(&cli.config, max_steps)?;
            let started = coordinator.launch(&prompt)?;
            eprintln!("run {}", started.state.id);
            drive(&coordinator, started, !detach)
        }
        Command::State { id } => {
            let cfg = load_config(&cli.config)?;
            let state = FileStore::new(cfg.store_dir).load(&id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&state).context("serialize run state")?
            );
            Ok(exit_codes::OK)
        }
        Command::Resume { id, max_steps } => {
            let coordinator = coordinator(&cli.config, max_steps)?;
            let started = coordinator.resume(&id)?;
            drive(&coordinator, started, false)
        }
        Command::Answer { id, answer } => {
            let coordinator = coordinator(&cli.config, None)?;
            let started = coordinator.provide_input(&id, &answer)?;
            drive(&coordinator, started, false)
        }
        Command::Recover { id } => {
            let coordinator = coordinator(&cli.config, None)?;
            let started = coordinator.recover(&id)?;
            drive(&coordinator, started, false)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    let cfg = if path.exists() && !force {
        eprintln!("{} already exists", path.display());
        load_config(path)?
    } else {
        let cfg = AgentConfig::default();
        write_config(path, &cfg)?;
        eprintln!("wrote {}", path.display());
        cfg
    };
    std::fs::create_dir_all(&cfg.store_dir)
        .with_context(|| format!("create {}", cfg.store_dir.display()))?;
    Ok(exit_codes::OK)
}

fn coordinator(config: &Path, max_steps: Option<u32>) -> Result<RunCoordinator> {
    let mut cfg = load_config(config)?;
    if let Some(max_steps) = max_steps {
        cfg.max_steps = max_steps;
    }
    build_coordinator(&cfg)
}

/// Wait for the run to stop; with `interactive`, answer questions from stdin
/// until the run stops for another reason or stdin is exhausted.
fn drive(coordinator: &RunCoordinator, started: StartedRun, interactive: bool) -> Result<i32> {
    let mut state = started.handle.wait()?;
    loop {
        if state.status != RunStatus::WaitingHumanInput || !interactive {
            return Ok(report(&state));
        }
        let Some(answer) = ask(&state)? else {
            return Ok(report(&state));
        };
        state = coordinator.provide_input(&state.id, &answer)?.handle.wait()?;
    }
}

fn ask(state: &RunState) -> Result<Option<String>> {
    let question = state.pending_question().unwrap_or_default();
    eprint!("{question}\n> ");
    io::stderr().flush().context("flush stderr")?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read answer from stdin")?;
    let answer = line.trim();
    if read == 0 || answer.is_empty() {
        return Ok(None);
    }
    Ok(Some(answer.to_string()))
}

fn report(state: &RunState) -> i32 {
    eprintln!("run {}: {} after {} steps", state.id, state.status, state.steps);
    match state.status {
        RunStatus::Complete => println!("{}", state.final_answer.as_deref().unwrap_or_default()),
        RunStatus::WaitingHumanInput => eprintln!(
            "waiting for input: {}",
            state.pending_question().unwrap_or_default()
        ),
        RunStatus::Failed => eprintln!("error: {}", state.error.as_deref().unwrap_or_default()),
        RunStatus::MaxStepsReached => eprintln!("step limit reached; `agentloop resume {}`", state.id),
        RunStatus::Running => {}
    }
    exit_codes::for_status(state.status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["agentloop", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "agentloop",
            "run",
            "What is 2+2?",
            "--max-steps",
            "3",
            "--detach",
            "--config",
            "alt.toml",
        ]);
        match cli.command {
            Command::Run {
                prompt,
                max_steps,
                detach,
            } => {
                assert_eq!(prompt, "What is 2+2?");
                assert_eq!(max_steps, Some(3));
                assert!(detach);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
    }

    #[test]
    fn parse_answer() {
        let cli = Cli::parse_from(["agentloop", "answer", "abc", "x + 2 = 5"]);
        assert!(matches!(
            cli.command,
            Command::Answer { ref id, ref answer } if id == "abc" && answer == "x + 2 = 5"
        ));
    }

    #[test]
    fn init_writes_default_config_and_store_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut cfg = AgentConfig::default();
        cfg.store_dir = dir.path().join("runs");
        write_config(&path, &cfg).expect("seed");

        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert!(dir.path().join("runs").is_dir());
        assert_eq!(load_config(&path).expect("load"), cfg);
    }
}
