//! composer - Run composed tasks.
//!
//! Usage:
//!   composer run <definition>       Run a composed task with local processes
//!   composer validate <definition>  Validate a definition without running it
//!   composer plan <definition>      Print the compiled execution plan

use clap::{Parser, Subcommand};
use composer::{
    ComposedTaskRunner, Event, EventBus, EventHandler, LocalTaskLauncher, RunContext, RunId,
    YamlLoader, compile,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// composer - run graphs of tasks as one unit of work
#[derive(Parser)]
#[command(name = "composer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a composed task, launching each step as a local process
    Run {
        /// Path to the definition YAML file
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,

        /// Override the pause between completion checks, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Keep running sequence children after a failure
        #[arg(long)]
        continue_on_failure: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a definition without running it
    Validate {
        /// Path to the definition YAML file
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,
    },

    /// Print the compiled execution plan
    Plan {
        /// Path to the definition YAML file
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,

        /// Also print the compiler's traversal trace
        #[arg(long)]
        trace: bool,
    },
}

/// Logging event handler that prints run events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted { name, run_id, .. } => {
                info!("Composed task '{}' started (run: {})", name, run_id);
            }
            Event::RunCompleted {
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Run {} completed successfully in {:?}", run_id, duration);
                } else {
                    error!("Run {} failed after {:?}", run_id, duration);
                }
            }
            Event::StepLaunched {
                step,
                task_name,
                execution_id,
                ..
            } => {
                info!("  Step '{}' launched {} (execution: {})", step, task_name, execution_id);
            }
            Event::StepCompleted { step, duration, .. } => {
                info!("  Step '{}' completed in {:?}", step, duration);
            }
            Event::StepFailed { step, reason, .. } => {
                warn!("  Step '{}' failed: {}", step, reason);
            }
            Event::SplitStarted {
                split, branches, ..
            } => {
                info!("  Split '{}' started with {} branches", split, branches);
            }
            Event::SplitCompleted { split, success, .. } => {
                let status = if *success { "succeeded" } else { "failed" };
                info!("  Split '{}' {}", split, status);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            definition,
            interval_ms,
            continue_on_failure,
            json,
        } => run_definition(definition, interval_ms, continue_on_failure, json).await,
        Commands::Validate { definition } => validate_definition(definition),
        Commands::Plan { definition, trace } => print_plan(definition, trace),
    }
}

async fn run_definition(
    path: PathBuf,
    interval_ms: Option<u64>,
    continue_on_failure: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut definition = YamlLoader::load_definition(&path)?;
    if let Some(ms) = interval_ms {
        definition.config.interval_time_between_checks_ms = ms;
    }
    if continue_on_failure {
        definition.config.continue_on_failure = true;
    }

    let launcher = Arc::new(
        LocalTaskLauncher::new(
            definition.config.platform_name.clone(),
            definition.local.maximum_task_executions,
        )
        .register_all(definition.apps.clone()),
    );

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let runner = ComposedTaskRunner::from_definition(&definition, launcher.clone(), launcher)
        .await?
        .with_event_bus(event_bus);

    info!(
        "Running '{}' ({} steps) on platform '{}'",
        runner.name(),
        runner.plan().step_count(),
        runner.config().platform_name
    );

    let shutdown = CancellationToken::new();
    let cancel = CancellationToken::new();
    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("Shutting down: no new steps will start (Ctrl+C again to stop waiting)");
            shutdown.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Abandoning running steps; launched tasks keep running");
                cancel.cancel();
            }
        }
    });

    let ctx = RunContext::new(RunId::new())
        .with_shutdown(shutdown)
        .with_cancel(cancel);
    let report = runner.run_with(ctx).await;
    signals.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Run {}: {:?}", report.run_id, report.outcome.status);
        for step in report.outcome.failed_steps() {
            let reason = step
                .reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("  FAILED {}: {}", step.node, reason);
        }
    }

    if !report.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_definition(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating {}", path.display());

    match YamlLoader::load_definition(&path) {
        Ok(definition) => {
            let plan = compile(&definition.graph)?;
            println!(
                "✓ '{}' is valid: {} steps, split depth {}",
                definition.name,
                plan.step_count(),
                plan.max_split_depth()
            );
            Ok(())
        }
        Err(e) => {
            println!("✗ {}", e);
            Err(e.into())
        }
    }
}

fn print_plan(path: PathBuf, trace: bool) -> Result<(), Box<dyn std::error::Error>> {
    let definition = YamlLoader::load_definition(&path)?;
    let plan = compile(&definition.graph)?;

    println!("{}", definition.name);
    if let Some(description) = &definition.description {
        println!("  {}", description);
    }
    println!();
    print!("{}", plan);

    if trace {
        println!();
        for marker in plan.trace() {
            println!("{:?}", marker);
        }
    }
    Ok(())
}
