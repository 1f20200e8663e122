use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use paraflow::plan::PlanFile;
use paraflow::{ParallelExecutor, TaskResult, TaskStatus};
use serde_json::Value;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(verbose: bool) -> Result<PathBuf> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paraflow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("paraflow.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(log_file)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    match &cli.command {
        Commands::Run { plan, concurrency, json } => handle_run_command(plan, *concurrency, *json, config).await,
        Commands::Check { plan } => handle_check_command(plan, config),
        Commands::Config => handle_config_command(config),
    }
}

async fn handle_run_command(plan_path: &Path, concurrency: Option<usize>, json: bool, config: &Config) -> Result<()> {
    info!("Running plan: {}", plan_path.display());

    let plan = PlanFile::load(plan_path).context(format!("Failed to load plan {}", plan_path.display()))?;
    let order: Vec<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();

    let mut executor_config = config.executor.clone();
    if let Some(n) = concurrency {
        executor_config.max_concurrent_tasks = n;
    }
    let executor: ParallelExecutor<Value> =
        ParallelExecutor::from_config(&executor_config).context("Invalid executor configuration")?;
    executor.submit_many(plan.into_tasks()).context("Failed to submit tasks")?;

    if !json {
        println!(
            "{} {} tasks, {} at a time",
            "Running:".cyan(),
            order.len(),
            executor.max_concurrent_tasks()
        );
    }

    let results = executor.execute_all().await;
    let stats = executor.get_stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&results).context("Failed to serialize results")?);
    } else {
        print_results(&order, &results);
        println!(
            "\n{} {} completed, {} failed, {} skipped ({:.0}% success)",
            "Summary:".cyan(),
            stats.successful_tasks.to_string().green(),
            stats.failed_tasks.to_string().red(),
            stats.skipped_tasks.to_string().yellow(),
            stats.success_rate * 100.0
        );
    }

    let unsuccessful = stats.unsuccessful_tasks();
    if unsuccessful > 0 {
        return Err(eyre!("{} of {} tasks did not complete", unsuccessful, stats.total_tasks));
    }
    Ok(())
}

fn print_results(order: &[String], results: &HashMap<String, TaskResult<Value>>) {
    for id in order {
        let Some(result) = results.get(id) else {
            continue;
        };
        let status = match result.status {
            TaskStatus::Completed => "completed".green(),
            TaskStatus::Failed => "failed".red(),
            TaskStatus::Skipped => "skipped".yellow(),
        };
        let mut line = format!("  {:<10} {} ({:.2}s", status, id.bold(), result.duration.as_secs_f64());
        if result.retry_count > 0 {
            line.push_str(&format!(", {} retries", result.retry_count));
        }
        line.push(')');
        println!("{}", line);

        match (&result.result, result.error_message()) {
            (Some(Value::String(out)), _) if !out.is_empty() => {
                for out_line in out.lines() {
                    println!("    {}", out_line.dimmed());
                }
            }
            (_, Some(error)) => println!("    {}", error.red()),
            _ => {}
        }
    }
}

fn handle_check_command(plan_path: &Path, config: &Config) -> Result<()> {
    info!("Checking plan: {}", plan_path.display());

    let plan = PlanFile::load(plan_path).context(format!("Failed to load plan {}", plan_path.display()))?;
    let count = plan.tasks.len();

    let executor: ParallelExecutor<Value> = ParallelExecutor::new(config.executor.max_concurrent_tasks);
    executor.submit_many(plan.into_tasks()).context("Failed to submit tasks")?;

    if let Err(e) = executor.validate_dependencies() {
        println!("{} {}", "Invalid:".red(), e);
        return Err(e).context("Plan failed validation");
    }

    println!("{} {} tasks", "Valid:".green(), count);
    for (level, ids) in executor.execution_plan().iter().enumerate() {
        println!("  {} {}", format!("[{}]", level).dimmed(), ids.join(", "));
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    info!("Printing effective configuration");
    let rendered = serde_json::to_string_pretty(&config.to_json()).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before anything else can fail
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
