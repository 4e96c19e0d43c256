use crate::error::CliError;
use engine_core::event_bus::EventBus;
use engine_processing::RunSummary;
use model::{
    core::field::Field,
    events::{IndexProgress, JoinProgress, Progress, StagingProgress},
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Prints staging, index and join progress to stderr until `stop` fires.
pub async fn spawn_progress_printer(events: &EventBus, stop: CancellationToken) -> JoinHandle<()> {
    let (_staging, mut staging) = events.channel::<StagingProgress>(64).await;
    let (_index, mut index) = events.channel::<IndexProgress>(64).await;
    let (_join, mut join) = events.channel::<JoinProgress>(64).await;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(event) = staging.recv() => {
                    eprintln!("staging {:<16} {:>7} rows {}", event.alias, event.rows, percent(event.progress));
                }
                Some(event) = index.recv() => {
                    eprintln!("index   {:<16} {}", format!("{}.{}", event.alias, event.field), percent(event.progress));
                }
                Some(event) = join.recv() => {
                    let remaining = event
                        .remaining_ms
                        .map(|ms| format!(", ~{}s left", ms.div_ceil(1000)))
                        .unwrap_or_default();
                    eprintln!(
                        "join    {:>7} read {:>7} written {}{remaining}",
                        event.rows_read, event.rows_written, percent(event.progress)
                    );
                }
                else => break,
            }
        }
    })
}

fn percent(progress: Progress) -> String {
    match progress.as_fraction() {
        Some(f) => format!("{:>5.1}%", f * 100.0),
        None => "...".to_string(),
    }
}

pub fn print_summary(summary: &RunSummary, as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json = serde_json::to_string_pretty(summary).map_err(CliError::JsonSerialize)?;
        println!("{json}");
        return Ok(());
    }

    println!("Run '{}':", summary.run_id);
    println!("-----------------------------");
    println!("{:<16} {}", "State", summary.state);
    println!("{:<16} {}", "Rows read", summary.rows_read);
    println!("{:<16} {}", "Rows written", summary.rows_written);
    println!("{:<16} {}", "Rows discarded", summary.rows_discarded);
    println!("{:<16} {}", "Row errors", summary.error_count);
    println!("{:<16} {:.2}s", "Elapsed", summary.elapsed.as_secs_f64());
    if let Some(backup) = &summary.backup {
        println!("{:<16} {backup}", "Backup");
    }
    for error in &summary.row_errors {
        println!("  {error}");
    }
    if summary.error_count > summary.row_errors.len() as u64 {
        println!(
            "  ... and {} more",
            summary.error_count - summary.row_errors.len() as u64
        );
    }
    Ok(())
}

#[derive(Serialize)]
pub struct TableInfo<'a> {
    pub location: String,
    pub records: Option<u64>,
    pub fields: Vec<FieldInfo<'a>>,
}

#[derive(Serialize)]
pub struct FieldInfo<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub data_type: &'static str,
    pub length: Option<usize>,
}

impl<'a> TableInfo<'a> {
    pub fn new(location: String, records: Option<u64>, fields: &'a [Field]) -> Self {
        let fields = fields
            .iter()
            .map(|f| FieldInfo {
                name: &f.name,
                data_type: f.data_type().name(),
                length: f.attributes.length(),
            })
            .collect();
        TableInfo {
            location,
            records,
            fields,
        }
    }
}

pub fn print_table_info(info: &TableInfo<'_>, as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json = serde_json::to_string_pretty(info).map_err(CliError::JsonSerialize)?;
        println!("{json}");
        return Ok(());
    }

    let records = info
        .records
        .map(|n| n.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    println!("Table '{}' ({records} records):", info.location);
    println!("-----------------------------");
    for field in &info.fields {
        match field.length {
            Some(length) => println!("{:<24} {}({length})", field.name, field.data_type),
            None => println!("{:<24} {}", field.name, field.data_type),
        }
    }
    Ok(())
}

pub fn print_tables(path: &str, tables: &[String], as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json = serde_json::to_string_pretty(tables).map_err(CliError::JsonSerialize)?;
        println!("{json}");
        return Ok(());
    }
    println!("'{path}' contains {} tables:", tables.len());
    for table in tables {
        println!("  {path}::{table}");
    }
    Ok(())
}
