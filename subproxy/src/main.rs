use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use subproxy::{load_config, LogLevel, ProcessSupervisor, Runner, ServiceManager};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "subproxy")]
#[command(about = "Turn proxy subscriptions into a running sing-box instance")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the sing-box config once and exit
    Gen,
    /// Generate, start sing-box and keep the config up to date
    Run,
    /// Print the processed node list
    List,
    /// Manage the background service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum ServiceAction {
    Install,
    Uninstall,
    Start,
    Stop,
    Enable,
    Disable,
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gen => generate(cli.config).await,
        Commands::Run => run(cli.config).await,
        Commands::List => list(cli.config).await,
        Commands::Service { action } => {
            init_tracing(LogLevel::default());
            service(action, cli.config).await
        }
    }
}

async fn generate(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let runner = runner(config_path).await?;
    runner.generate_once().await?;
    Ok(())
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let runner = runner(config_path).await?;
    let mut supervisor = ProcessSupervisor::new();
    runner.run_daemon(&mut supervisor).await?;
    Ok(())
}

async fn list(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let runner = runner(config_path).await?;
    for node in runner.list_nodes().await? {
        println!("{} ({})", node.tag, node.source);
    }
    Ok(())
}

async fn service(action: ServiceAction, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let manager = ServiceManager::detect()?;
    match action {
        ServiceAction::Install => manager.install(config_path.as_deref()).await?,
        ServiceAction::Uninstall => manager.uninstall().await?,
        ServiceAction::Start => manager.start().await?,
        ServiceAction::Stop => manager.stop().await?,
        ServiceAction::Enable => manager.enable().await?,
        ServiceAction::Disable => manager.disable().await?,
        ServiceAction::Status => manager.status().await?,
    }
    Ok(())
}

async fn runner(config_path: Option<PathBuf>) -> anyhow::Result<Runner> {
    let config = load_config(config_path.as_deref())
        .await
        .context("failed to load config")?;
    init_tracing(config.sing_box.log_level);
    info!("Loaded {} subscriptions and {} static nodes.", config.subscriptions.len(), config.nodes.len());
    Ok(Runner::new(config)?)
}

// RUST_LOG wins over the configured level.
fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
