//! CLI for the two-phase course quality-check orchestrator.
//!
//! Every command prints a JSON response envelope on stdout (diagnostics go
//! to stderr via tracing) so the output is consumable by the dashboard
//! backend and by shell automation alike.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use orchestrator::core::types::ActionItem;
use orchestrator::error::{TaskError, TaskErrorKind};
use orchestrator::exit_codes;
use orchestrator::io::config::load_config;
use orchestrator::io::invoker::ProcessWorkerInvoker;
use orchestrator::logging;
use orchestrator::service::{DebugInfo, Envelope, TaskService};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Two-phase course quality-check task orchestrator"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "orchestrator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task in analyze mode and print its findings.
    Analyze {
        /// Registered task id (see `tasks`).
        #[arg(long)]
        task: String,
        /// Course to analyze.
        #[arg(long = "course-id")]
        course_id: String,
    },
    /// Execute an approved subset of previously proposed actions.
    Execute {
        #[arg(long)]
        task: String,
        #[arg(long = "course-id")]
        course_id: String,
        /// File holding a JSON array of approved actions ('-' reads stdin).
        #[arg(long)]
        approved: String,
    },
    /// List registered tasks.
    Tasks,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let invoker = ProcessWorkerInvoker {
        python_bin: config.python_bin.clone(),
        scripts_dir: config.scripts_dir.clone(),
    };
    let service = TaskService::new(config, invoker)
        .map_err(|err| anyhow::anyhow!("{}", err.message))?;

    match cli.command {
        Command::Analyze { task, course_id } => cmd_analyze(&service, &task, &course_id),
        Command::Execute {
            task,
            course_id,
            approved,
        } => cmd_execute(&service, &task, &course_id, &approved),
        Command::Tasks => cmd_tasks(&service),
    }
}

fn cmd_analyze(
    service: &TaskService<ProcessWorkerInvoker>,
    task: &str,
    course_id: &str,
) -> Result<i32> {
    match service.analyze(task, course_id) {
        Ok(report) => {
            print_envelope(&Envelope::success(report))?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            let debug = DebugInfo::new(task, course_id, &err);
            print_envelope(&Envelope::<serde_json::Value>::failure(&err, Some(debug)))?;
            Ok(exit_code_for(&err))
        }
    }
}

fn cmd_execute(
    service: &TaskService<ProcessWorkerInvoker>,
    task: &str,
    course_id: &str,
    approved: &str,
) -> Result<i32> {
    let actions = match read_approved(approved).and_then(|raw| parse_actions(&raw)) {
        Ok(actions) => actions,
        Err(err) => {
            let err = TaskError::invalid_input(format!("approved actions: {err:#}"));
            print_envelope(&Envelope::<serde_json::Value>::failure(&err, None))?;
            return Ok(exit_codes::INVALID);
        }
    };
    match service.execute_approved(task, course_id, &actions) {
        Ok(report) => {
            print_envelope(&Envelope::success(report))?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            print_envelope(&Envelope::<serde_json::Value>::failure(&err, None))?;
            Ok(exit_code_for(&err))
        }
    }
}

fn cmd_tasks(service: &TaskService<ProcessWorkerInvoker>) -> Result<i32> {
    let tasks: Vec<_> = service.registry().descriptors().collect();
    print_envelope(&Envelope::success(tasks))?;
    Ok(exit_codes::OK)
}

/// Read the approved-actions source: a file path or '-' for stdin.
fn read_approved(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("read approved actions from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(source).with_context(|| format!("read {source}"))
}

fn parse_actions(raw: &str) -> Result<Vec<ActionItem>> {
    serde_json::from_str(raw).context("parse as a JSON array of actions")
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(envelope).context("serialize response envelope")?;
    payload.push('\n');
    print!("{payload}");
    Ok(())
}

fn exit_code_for(err: &TaskError) -> i32 {
    match err.kind {
        TaskErrorKind::InvalidInput | TaskErrorKind::UnknownTask | TaskErrorKind::TaskBusy => {
            exit_codes::INVALID
        }
        TaskErrorKind::Timeout => exit_codes::TIMEOUT,
        _ => exit_codes::WORKER_FAILED,
    }
}
