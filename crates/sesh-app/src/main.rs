//! Sesh application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the audit database
//! 4. Dispatch the subcommand (skills, run, audit, config)

mod cli;
mod plan_file;

use std::sync::Arc;

use clap::Parser;
use tokio_stream::StreamExt;

use sesh_action::{ConfirmationDecision, DryRunExecutor, ExecutionEngine, PendingConfirmation};
use sesh_core::audit::{AuditLog, ExecutionAuditEntry};
use sesh_core::config::SeshConfig;
use sesh_core::settings::SettingsStore;
use sesh_core::types::{ThreadId, Timestamp};
use sesh_skills::{SkillConfigStore, SkillGraph};
use sesh_storage::{Database, SqliteAuditLog};

use cli::{CliArgs, Command};
use plan_file::PlanFile;

const DB_FILE: &str = "sesh.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = SeshConfig::load_or_default(&config_file);

    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let data_dir = args.resolve_data_dir(&config.general.data_dir);

    match args.command {
        Command::Skills { thread, toggle } => show_skills(&config, &thread, &toggle)?,
        Command::Run { plan, mode, yes } => {
            let db = Arc::new(Database::open(&data_dir.join(DB_FILE))?);
            let plan = PlanFile::load(&plan)?.into_plan()?;
            run_plan(&config, db, plan, mode.map(Into::into), yes).await?;
        }
        Command::Audit {
            thread,
            plan,
            limit,
        } => {
            let db = Arc::new(Database::open(&data_dir.join(DB_FILE))?);
            let log = SqliteAuditLog::new(db);
            let entries = match (thread, plan) {
                (Some(thread), _) => log.by_thread(&ThreadId::new(thread))?,
                (None, Some(plan_id)) => log.by_plan(plan_id)?,
                (None, None) => log.recent(limit)?,
            };
            if entries.is_empty() {
                println!("No audit entries.");
            }
            for entry in &entries {
                print_audit_entry(entry);
            }
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn show_skills(
    config: &SeshConfig,
    thread: &str,
    toggles: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SkillConfigStore::new(Arc::new(SkillGraph::builtin()?), config.skills.clone())?;
    let thread_id = ThreadId::from(thread);

    for skill_id in toggles {
        store.toggle_for_thread(&thread_id, skill_id)?;
    }

    let enabled = store.effective_enabled(&thread_id);
    println!("Skills for thread '{}':", thread_id);
    for skill in store.graph().skills() {
        let mark = if enabled.contains(&skill.id) { "x" } else { " " };
        let confirm = if store.requires_confirmation(&skill.id) {
            " (confirm)"
        } else {
            ""
        };
        println!(
            "  [{}] {:<16} {:<12} {:<9} {}{}",
            mark, skill.id, skill.category, skill.risk_level, skill.name, confirm
        );
    }

    let tools = store.tools_for_thread(&thread_id);
    println!();
    println!("Tools ({}): {}", tools.len(), tools.join(", "));
    Ok(())
}

async fn run_plan(
    config: &SeshConfig,
    db: Arc<Database>,
    plan: sesh_action::Plan,
    mode: Option<sesh_core::types::ExecutionMode>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let audit = Arc::new(SqliteAuditLog::new(db));
    let settings = Arc::new(SettingsStore::new(config.execution.clone()));
    let engine = ExecutionEngine::new(Arc::new(DryRunExecutor::new()), audit, settings);

    let thread_id = plan.thread_id.clone();
    let plan_id = plan.id;
    if mode.is_some() {
        engine.set_thread_mode(&thread_id, mode);
    }

    let mut progress = Box::pin(engine.on_progress(&thread_id));
    let printer = tokio::spawn(async move {
        while let Some(p) = progress.next().await {
            println!(
                "  progress: {}/{} done, {} failed, {} skipped, {} rejected ({:.0}%) [{}]",
                p.completed_actions,
                p.total_actions,
                p.failed_actions,
                p.skipped_actions,
                p.rejected_actions,
                p.percentage,
                p.status
            );
        }
    });

    let submission = engine.submit_plan(plan)?;
    println!(
        "Plan {} submitted: {} steps on thread '{}' ({} mode)",
        plan_id,
        submission.step_ids.len(),
        thread_id,
        engine.thread_mode(&thread_id)
    );

    loop {
        engine.wait_idle(&thread_id).await;
        let pending = engine.pending_confirmations(&thread_id);
        if pending.is_empty() {
            break;
        }
        for request in pending {
            let decision = if yes {
                ConfirmationDecision::Approve
            } else {
                prompt(request.clone()).await?
            };
            engine.confirm_action(request.action_id, decision, None, None)?;
        }
    }

    printer.abort();

    let Some(plan) = engine.plan(plan_id) else {
        return Ok(());
    };
    println!();
    println!(
        "Plan {}: {} ({} completed, {} failed, {} skipped, {} rejected)",
        plan.id,
        plan.status,
        plan.completed_steps,
        plan.failed_steps,
        plan.skipped_steps,
        plan.rejected_steps
    );
    let mut steps: Vec<_> = plan.steps.iter().collect();
    steps.sort_by_key(|s| s.step_number);
    for step in steps {
        let outcome = step
            .error
            .as_deref()
            .or(step.result.as_deref())
            .unwrap_or("");
        println!(
            "  {:>3}. {:<10} {} {}",
            step.step_number, step.status, step.description, outcome
        );
    }
    Ok(())
}

/// Ask on stdin whether to run an action. Anything but `y`/`yes` rejects.
async fn prompt(
    request: PendingConfirmation,
) -> Result<ConfirmationDecision, Box<dyn std::error::Error>> {
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Write;
        println!();
        println!("Confirm [{}] {}", request.risk_level, request.description);
        for reason in &request.reasons {
            println!("  - {}", reason);
        }
        print!("Run it? [y/N] ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConfirmationDecision::Approve,
        _ => ConfirmationDecision::Reject,
    })
}

fn print_audit_entry(entry: &ExecutionAuditEntry) {
    let outcome = if entry.success { "ok" } else { "FAILED" };
    println!(
        "{} {:<6} {:<16} {:<9} {:<10} approval={} thread={}{}",
        format_timestamp(entry.timestamp),
        outcome,
        entry.action_type,
        entry.risk_level,
        entry.mode,
        entry.approval,
        entry.thread_id,
        entry
            .error
            .as_deref()
            .map(|e| format!(" error={}", e))
            .unwrap_or_default()
    );
}

fn format_timestamp(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts.0, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.0.to_string())
}
