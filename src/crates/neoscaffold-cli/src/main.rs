//! neoscaffold - command-line host for NeoScaffold workflows

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use neoscaffold_client::{ClientSettings, ConfigLoader};
use neoscaffold_core::{InterventionKind, NodeId};

/// Compile, queue and debug NeoScaffold workflows
#[derive(Parser, Debug)]
#[command(name = "neoscaffold")]
#[command(version)]
#[command(about = "Compile, queue and debug NeoScaffold workflows", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend URL (overrides config)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the structural checksum of a workflow
    Checksum {
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,
    },
    /// Compile a workflow into an execution plan
    Compile {
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Extension descriptors, as returned by the backend
        #[arg(short, long, value_name = "FILE")]
        extensions: Option<PathBuf>,
    },
    /// Compile a workflow and queue it on the backend
    Queue {
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Number of copies to queue
        #[arg(short, long, default_value_t = 1)]
        batch: usize,
    },
    /// Toggle breakpoints, stop points or restart points
    Intervene {
        /// breakpoint, stop or restart
        #[arg(value_name = "KIND")]
        kind: InterventionKind,

        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Node ids to toggle
        #[arg(short, long, value_delimiter = ',')]
        nodes: Vec<NodeId>,

        /// Apply to every node
        #[arg(long)]
        all: bool,
    },
    /// Release paused nodes for one step
    Step {
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Paused node ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        nodes: Vec<NodeId>,
    },
    /// Keep a workspace connected: autosave, realtime updates and reconnects
    Watch {
        /// Workflow to load instead of the autosaved one
        #[arg(value_name = "WORKFLOW")]
        workflow: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut settings, load_error) = match load_settings(&args).await {
        Ok(settings) => (settings, None),
        Err(e) => (ClientSettings::default(), Some(e)),
    };
    if let Some(url) = &args.url {
        settings.base_url = url.clone();
    }

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        match settings.log_level.as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = load_error {
        warn!("Failed to load config: {}, using defaults", e);
    }
    info!("neoscaffold {} against {}", env!("CARGO_PKG_VERSION"), settings.base_url);

    match args.command {
        Command::Checksum { workflow } => commands::checksum(&workflow).await,
        Command::Compile {
            workflow,
            extensions,
        } => commands::compile(&workflow, extensions.as_deref()).await,
        Command::Queue { workflow, batch } => commands::queue(settings, &workflow, batch).await,
        Command::Intervene {
            kind,
            workflow,
            nodes,
            all,
        } => commands::intervene(settings, kind, &workflow, nodes, all).await,
        Command::Step { workflow, nodes } => commands::step(settings, &workflow, nodes).await,
        Command::Watch { workflow } => commands::watch(settings, workflow.as_deref()).await,
    }
}

async fn load_settings(args: &Args) -> neoscaffold_client::Result<ClientSettings> {
    let loader = ConfigLoader::new();
    match &args.config {
        Some(path) => loader.load_file(path).await,
        None => loader.load().await,
    }
}
