//! `flowline` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — migrate, load triggers and start the API server.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow JSON file.
//! - `run`      — run a workflow JSON file once against an in-memory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use db::{MemoryDatabase, PgDatabase};
use engine::{Engine, FlowGraph, ProcessorOptions, WorkflowDefinition, WorkflowRuntime};

#[derive(Parser)]
#[command(name = "flowline", about = "Persistent workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "FLOWLINE_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = db::pool::DEFAULT_MAX_CONNECTIONS)]
        max_connections: u32,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition once, in memory, and print the jobs.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger payload as inline JSON.
        #[arg(long, default_value = "{}")]
        context: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            database_url,
            max_connections,
        } => {
            let pool = db::pool::create_pool(&database_url, max_connections)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;

            let runtime = WorkflowRuntime::new(Engine::new(Arc::new(PgDatabase::new(pool))));
            let live = runtime.load().await?;
            info!("Starting API server on {bind} with {live} live workflows");
            api::serve(&bind, api::AppState::new(runtime)).await?;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            match FlowGraph::new(definition.nodes).validate() {
                Ok(order) => println!("Workflow is valid. Node order: {order:?}"),
                Err(e) => bail!("validation failed: {e}"),
            }
        }
        Command::Run { path, context } => {
            let definition = read_definition(&path)?;
            let context: Value = serde_json::from_str(&context).context("--context is not valid JSON")?;

            let runtime = WorkflowRuntime::new(Engine::new(Arc::new(MemoryDatabase::new())));
            let workflow = runtime.install(definition).await?;
            let execution = runtime
                .trigger(&workflow, context, ProcessorOptions::default())
                .await?;
            let (execution, jobs) = runtime.execution_with_jobs(execution.id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "execution": execution, "jobs": jobs }))?
            );
        }
    }
    Ok(())
}

fn read_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}
