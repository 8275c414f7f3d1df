mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use sweeper_core::activity::ActivityEvent;
use sweeper_core::storage::Database;
use sweeper_core::{AppConfig, CleanupExecutionResult, CleanupExecutor, MonitorEngine, SessionState};
use tracing::{error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match sweeper_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let outcome = match args.command {
        Some(Commands::Watch { volume }) => run_watch(config, volume).await,
        Some(Commands::Analyze {
            folders,
            reason,
            yes,
        }) => run_analyze(config, &folders, &reason, yes).await,
        Some(Commands::Clean { paths, yes }) => run_clean(paths, yes).await,
        Some(Commands::History { limit, csv }) => run_history(&config, limit, csv.as_deref()),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

async fn run_watch(mut config: AppConfig, volume: Option<String>) -> anyhow::Result<()> {
    if let Some(volume) = volume {
        config.volume = volume;
    }
    let engine = Arc::new(MonitorEngine::new(config).context("building monitor")?);

    let mut live = engine.orchestrator().activity().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = live.recv().await {
            print_activity(&event);
        }
    });

    let shutdown = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    info!("Watching volume {} (Ctrl-C to stop)", engine.config().volume.cyan());
    let stats = engine.watch_volume().await?;

    let pending = engine.orchestrator().pending_count();
    info!(
        "{} records read, {} batches analyzed, {} sessions left awaiting approval",
        format!("{}", stats.reader.records_emitted).green(),
        format!("{}", stats.batcher.batches_dispatched).green(),
        format!("{}", pending).yellow(),
    );
    Ok(())
}

async fn run_analyze(
    config: AppConfig,
    folders: &[String],
    reason: &str,
    yes: bool,
) -> anyhow::Result<()> {
    let wait_limit = config.brain.timeout() + Duration::from_secs(10);
    let engine = MonitorEngine::new(config).context("building orchestrator")?;
    let orchestrator = engine.orchestrator();

    let outcome = orchestrator.analyze_now(folders, reason);
    if !outcome.accepted {
        println!("{} nothing to analyze", "•".yellow());
        return Ok(());
    }
    let Some(id) = outcome.session_id else {
        bail!("analysis accepted without a session");
    };

    let session = wait_for_proposal(&orchestrator, id, wait_limit).await;
    let Some(session) = session else {
        // Auto-executed or nothing to suggest; the activity log says which.
        if let Some(last) = orchestrator.activity().recent().last() {
            print_activity(last);
        }
        return Ok(());
    };
    if session.state != SessionState::Approval {
        bail!("session {} still in {} after {:?}", id, session.state, wait_limit);
    }

    println!(
        "{} {} suggestions, {} reclaimable",
        "Proposal".bold(),
        session.suggestions.len(),
        format_bytes(session.reclaimable_bytes() as i64).green()
    );
    for suggestion in &session.suggestions {
        let marker = if suggestion.safe_to_delete {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} [{}] {} ({}) {}",
            marker,
            suggestion.category.cyan(),
            suggestion.file_path.display(),
            format_bytes(suggestion.size_bytes as i64),
            suggestion.reason.dimmed()
        );
    }

    let approved = yes || prompt_confirm("Delete the safe items above?", Some(false))?;
    if !approved {
        orchestrator.reject(id)?;
        println!("{}", "Rejected".yellow());
        return Ok(());
    }

    let result = orchestrator.approve(id).await?;
    print_result(&result);
    Ok(())
}

async fn wait_for_proposal(
    orchestrator: &sweeper_core::Orchestrator,
    id: Uuid,
    limit: Duration,
) -> Option<sweeper_core::AnalysisSession> {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    loop {
        let session = orchestrator.session(id)?;
        if session.state != SessionState::Proposal || waited >= limit {
            return Some(session);
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

async fn run_clean(paths: Vec<PathBuf>, yes: bool) -> anyhow::Result<()> {
    if !yes {
        let prompt = format!("Permanently delete {} paths?", paths.len());
        if !prompt_confirm(&prompt, Some(false))? {
            return Ok(());
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling cleanup...");
            on_ctrl_c.store(true, Ordering::Relaxed);
        }
    });

    let executor = CleanupExecutor::new(cancel).with_reporter(Arc::new(CliReporter::new()));
    let result = tokio::task::spawn_blocking(move || executor.execute(&paths)).await?;
    print_result(&result);
    Ok(())
}

fn run_history(config: &AppConfig, limit: i64, csv_path: Option<&Path>) -> anyhow::Result<()> {
    let db = open_report_db(config)?;
    let reports = db.recent_reports(limit)?;
    let (total, bytes) = db.report_summary()?;

    for report in &reports {
        let outcome = match report.outcome.as_str() {
            "executed" => report.outcome.as_str().green(),
            "rejected" => report.outcome.as_str().yellow(),
            other => other.dimmed(),
        };
        println!(
            "{}  {:<14} {:<28} {:>5} files {:>10}  {}",
            report.completed_at,
            outcome,
            report.scope,
            report.files_deleted,
            format_bytes(report.bytes_freed),
            if report.errors.is_empty() {
                String::new()
            } else {
                format!("{} errors", report.errors.len()).red().to_string()
            }
        );
    }
    info!(
        "{} reports stored, {} freed in total",
        total,
        format_bytes(bytes).green()
    );

    if let Some(path) = csv_path {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record([
            "session_id",
            "scope",
            "outcome",
            "user_approved",
            "suggestion_count",
            "files_deleted",
            "bytes_freed",
            "errors",
            "created_at",
            "completed_at",
        ])?;
        for report in &reports {
            writer.write_record([
                report.session_id.clone(),
                report.scope.clone(),
                report.outcome.to_string(),
                report.user_approved.to_string(),
                report.suggestion_count.to_string(),
                report.files_deleted.to_string(),
                report.bytes_freed.to_string(),
                report.errors.join("; "),
                report.created_at.clone(),
                report.completed_at.clone(),
            ])?;
        }
        writer.flush()?;
        info!("Exported {} reports to {}", reports.len(), path.display());
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> anyhow::Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the report history?",
        Some(false),
    )? {
        return Ok(());
    }
    let db = open_report_db(config)?;
    db.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn open_report_db(config: &AppConfig) -> anyhow::Result<Database> {
    let Some(path) = config.report_db.as_deref() else {
        bail!("no report_db configured");
    };
    Database::open(path).with_context(|| format!("opening {}", path))
}

fn print_activity(event: &ActivityEvent) {
    let state = event
        .state
        .map(|s| s.to_string())
        .unwrap_or_default();
    println!(
        "{} {:<10} {:<9} {} {}",
        event.timestamp.format("%H:%M:%S").to_string().dimmed(),
        format!("{:?}", event.event_type).cyan(),
        state,
        event.message,
        event.scope.dimmed()
    );
}

fn print_result(result: &CleanupExecutionResult) {
    let status = if result.success {
        "Cleanup succeeded".green()
    } else {
        "Cleanup finished with errors".red()
    };
    println!(
        "{}: {} files deleted, {} freed",
        status,
        result.files_deleted,
        format_bytes(result.bytes_freed)
    );
    for err in &result.errors {
        println!("  {} {}", "✗".red(), err);
    }
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
