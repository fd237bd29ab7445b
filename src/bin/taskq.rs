//! taskq CLI: run an external command as a deduplicated background task.

use std::process::Command as Process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use taskq::config::Config;
use taskq::model::{NewTask, TaskId, TaskStatus};
use taskq::service::TaskService;
use taskq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "taskq", about = "Deduplicated background task runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command as a task and print its final snapshot
    Run {
        /// Task type (the dedup key)
        task_type: String,
        /// Skip dedup and rate limiting
        #[arg(long)]
        allow_duplicate: bool,
        /// Override the minimum interval between starts, in seconds
        #[arg(long)]
        min_interval: Option<u64>,
        /// Metadata entries as key=value (value parsed as JSON when possible)
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, serde_json::Value)>,
        /// Submit the same request this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Command and arguments to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct CommandOutput {
    exit_code: i32,
    stdout: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "taskq".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let service = Arc::new(TaskService::new(config.task));
    let janitor = service.spawn_janitor();

    let result = match cli.command {
        Command::Run {
            task_type,
            allow_duplicate,
            min_interval,
            meta,
            repeat,
            command,
        } => {
            let mut new = NewTask::new(task_type).allow_duplicate(allow_duplicate);
            if let Some(secs) = min_interval {
                new = new.min_interval(Duration::from_secs(secs));
            }
            for (key, value) in meta {
                new = new.meta(key, value);
            }
            cmd_run(&service, new, repeat, command).await
        }
    };

    service.shutdown();
    let _ = janitor.await;
    result
}

async fn cmd_run(
    service: &TaskService,
    new: NewTask,
    repeat: u32,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let mut first: Option<TaskId> = None;

    for attempt in 1..=repeat.max(1) {
        let (program, args) = command
            .split_first()
            .context("no command given")?;
        let work = command_work(program.clone(), args.to_vec());

        match service.create_task(new.clone(), work) {
            Ok(outcome) => {
                println!(
                    "#{attempt}: {} {} ({})",
                    if outcome.is_new { "created" } else { "merged" },
                    outcome.task_id,
                    outcome.message
                );
                first.get_or_insert(outcome.task_id);
            }
            Err(taskq::Error::RateLimited {
                retry_after_secs, ..
            }) => {
                println!("#{attempt}: rate limited, retry in {retry_after_secs}s");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let Some(id) = first else {
        anyhow::bail!("no task was created");
    };

    let snapshot = loop {
        let snapshot = service.get_task(id)?;
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.status == TaskStatus::Failed {
        anyhow::bail!(
            "task {id} failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn command_work(
    program: String,
    args: Vec<String>,
) -> impl FnOnce() -> anyhow::Result<CommandOutput> + Send + 'static {
    move || {
        let output = Process::new(&program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to launch {program}"))?;
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            anyhow::bail!(
                "{program} exited with status {exit_code}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

fn parse_meta(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
