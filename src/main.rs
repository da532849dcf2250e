//! Reviewmaster - review job orchestration for AI code-review agents

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reviewmaster::{
    config::{default_config_path, load_config, Config},
    context::{ContextSyncBridge, FileContextStore, JobContextRegistry, ReviewContextStore},
    domain::{ContextProgress, ReviewPhase},
    progress::ProgressStore,
    tools::{transport::serve_stdio, ToolContext, ToolServer},
    watcher::{ContextWatcher, ProgressCallback},
};

#[derive(Parser)]
#[command(name = "reviewmaster")]
#[command(author = "Reviewmaster Team")]
#[command(version)]
#[command(about = "Review job orchestration and progress tracking for AI code-review agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/reviewmaster/config.toml)
    #[arg(short, long, env = "REVIEWMASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the job context registry
    #[arg(long, env = "REVIEWMASTER_DATA_DIR")]
    data_dir: Option<String>,

    /// Maximum reviews running at once
    #[arg(long, env = "REVIEWMASTER_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the review tools over stdio for an agent process
    Tools,
    /// Print each progress change of a review context as a JSON line
    Watch {
        /// Project checkout holding the review context
        local_path: PathBuf,
        /// Merge request id, e.g. gitlab-group/project-42
        merge_request_id: String,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = effective_config(&cli);

    match cli.command {
        Commands::Tools => run_tools(&config).await,
        Commands::Watch {
            local_path,
            merge_request_id,
        } => run_watch(&config, local_path, merge_request_id).await,
        Commands::Config => {
            println!("# {}", cli.config.unwrap_or_else(default_config_path).display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// stdout carries protocol traffic and watch output, so logs go to stderr
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "reviewmaster=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn effective_config(cli: &Cli) -> Config {
    let mut config = load_config(cli.config.as_deref());
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    if let Some(max) = cli.max_concurrent {
        config.queue.max_concurrent = max;
    }
    config
}

fn context_store(config: &Config) -> Arc<dyn ReviewContextStore> {
    Arc::new(FileContextStore::new(&config.storage.context_dir_name))
}

async fn run_tools(config: &Config) -> anyhow::Result<()> {
    let registry_path = config.storage.registry_path();
    let registry = Arc::new(
        JobContextRegistry::durable(&registry_path)
            .await
            .with_context(|| format!("Failed to open job registry {}", registry_path.display()))?,
    );
    let contexts = context_store(config);

    let progress = ProgressStore::new();
    progress
        .subscribe(Arc::new(ContextSyncBridge::new(
            contexts.clone(),
            registry.clone(),
        )))
        .await;

    let server = ToolServer::with_review_tools(ToolContext::new(
        progress,
        contexts,
        registry,
        config.agents.clone(),
    ));

    serve_stdio(&server).await?;
    Ok(())
}

async fn run_watch(
    config: &Config,
    local_path: PathBuf,
    merge_request_id: String,
) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |progress: ContextProgress| {
        let _ = tx.send(progress);
    });

    let watcher = ContextWatcher::new(context_store(config), config.watcher.poll_interval());
    watcher.start(&local_path, &merge_request_id, callback);

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(progress) = received else { break };
                println!("{}", serde_json::to_string(&progress)?);
                if progress.phase == ReviewPhase::Completed {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watcher");
                break;
            }
        }
    }

    watcher.stop_all();
    Ok(())
}
