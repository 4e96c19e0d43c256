use crate::{
    commands::{Commands, OptionsCommand},
    error::CliError,
    job::JobSpec,
    output::TableInfo,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::{
    adapter::{Adapter, TableLocation},
    error::AdapterError,
};
use engine_config::Options;
use engine_processing::ExecutionError;
use engine_runtime::{BackgroundTaskQueue, Engine, EngineError};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod job;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "fieldjoin", version = "0.1.0", about = "Join tables on key fields")]
struct Cli {
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let coordinator = ShutdownCoordinator::new(CancellationToken::new());
    coordinator.register_handlers();

    let code = match dispatch(cli.command, &coordinator).await {
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => {
            warn!("Stopped on request");
            ExitCode::ShutdownRequested
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn dispatch(command: Commands, coordinator: &ShutdownCoordinator) -> Result<(), CliError> {
    match command {
        Commands::Run {
            job,
            overwrite,
            json,
        } => run_job(&job, overwrite, json, coordinator).await,
        Commands::Inspect { path, json } => inspect(&path, json),
        Commands::Options { command } => options(command),
    }
}

async fn run_job(
    path: &str,
    overwrite: bool,
    as_json: bool,
    coordinator: &ShutdownCoordinator,
) -> Result<(), CliError> {
    let job = JobSpec::load(path).await?;
    let base = Path::new(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let options = Options::load(&Options::default_path()?)?;
    let mut engine = Engine::open(job.engine_settings(), options)?;
    job.apply(&mut engine, &base, overwrite)?;

    let cancel = coordinator.cancel_token();
    let stop_printer = CancellationToken::new();
    let printer = output::spawn_progress_printer(engine.events(), stop_printer.clone()).await;

    let queue = BackgroundTaskQueue::new();
    queue.enqueue_all(job.tasks(&engine)).await;
    let report = queue.drain(&mut engine, &cancel).await;
    info!(
        completed = report.completed,
        failed = report.failed.len(),
        "Preparation finished"
    );

    let result = if report.cancelled || coordinator.is_shutdown_requested() {
        Err(CliError::ShutdownRequested)
    } else if !report.failed.is_empty() {
        let failures: Vec<String> = report
            .failed
            .iter()
            .map(|(task, message)| format!("{task}: {message}"))
            .collect();
        Err(CliError::Tasks(failures.join("; ")))
    } else if !report.stalled.is_empty() {
        let stalled: Vec<String> = report.stalled.iter().map(ToString::to_string).collect();
        Err(CliError::Tasks(format!(
            "tasks could not make progress: {}",
            stalled.join(", ")
        )))
    } else {
        match engine.execute_output(&cancel).await {
            Ok(summary) => {
                output::print_summary(&summary, as_json)?;
                if coordinator.is_shutdown_requested() {
                    Err(CliError::ShutdownRequested)
                } else {
                    Ok(())
                }
            }
            Err(EngineError::Execution(ExecutionError::TableExists(_))) => {
                Err(CliError::OutputExists(job.output.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    };

    stop_printer.cancel();
    let _ = printer.await;
    result
}

fn inspect(path: &str, as_json: bool) -> Result<(), CliError> {
    let location = TableLocation::parse(path);
    match Adapter::open_source(&location) {
        Ok(mut source) => {
            let records = source.record_count()?;
            let info = TableInfo::new(location.to_string(), records, source.fields());
            output::print_table_info(&info, as_json)
        }
        Err(AdapterError::NeedsTableSelection { path, tables }) => {
            output::print_tables(&path, &tables, as_json)
        }
        Err(e) => Err(e.into()),
    }
}

fn options(command: OptionsCommand) -> Result<(), CliError> {
    let path = Options::default_path()?;
    match command {
        OptionsCommand::Show => {
            let options = Options::load(&path)?;
            for (key, value) in options.iter() {
                println!("{key:<24} {value}");
            }
        }
        OptionsCommand::Set { key, value } => {
            let mut options = Options::load(&path)?;
            options.set_from_text(&key, &value)?;
            options.save(&path)?;
            info!(key = %key, path = %path.display(), "Option stored");
        }
        OptionsCommand::Path => println!("{}", path.display()),
    }
    Ok(())
}
