use crate::config::NormalizedConfig;
use crate::fetcher::{FetchConfig, Fetcher};
use crate::parser::custom_nodes;
use crate::processing::NodePipeline;
use crate::singbox::build_singbox_config;
use crate::storage::{ensure_dir, write_json_if_changed};
use crate::supervisor::ProcessSupervisor;
use crate::types::{NodeCandidate, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Wires fetch, processing, synthesis and persistence together.
pub struct Runner {
    config: NormalizedConfig,
    fetcher: Fetcher,
}

impl Runner {
    pub fn new(config: NormalizedConfig) -> Result<Self> {
        let fetcher = Fetcher::new(FetchConfig::with_timeout_ms(config.test.timeout_ms))?;
        Ok(Self { config, fetcher })
    }

    pub fn config(&self) -> &NormalizedConfig {
        &self.config
    }

    /// Subscription nodes followed by static nodes, filtered then renamed.
    pub async fn build_nodes(&self) -> Result<Vec<NodeCandidate>> {
        let mut nodes = self.fetcher.fetch_subscriptions(&self.config.subscriptions).await?;
        nodes.extend(custom_nodes(&self.config.nodes));

        let nodes = NodePipeline::standard(&self.config.exclude_keywords).run(nodes);
        if nodes.is_empty() {
            warn!("No nodes after filtering.");
        } else {
            info!("Loaded {} nodes.", nodes.len());
        }
        Ok(nodes)
    }

    /// One full cycle. Returns whether the config on disk changed.
    pub async fn update(&self) -> Result<bool> {
        let nodes = self.build_nodes().await?;
        let document = build_singbox_config(&nodes, &self.config)?;
        write_json_if_changed(&self.config.sing_box.config_path, &document).await
    }

    /// Generate the config once, without touching any running sing-box.
    pub async fn generate_once(&self) -> Result<PathBuf> {
        ensure_dir(&self.config.sing_box.work_dir).await?;
        self.update().await?;

        let path = self.config.sing_box.config_path.clone();
        info!("Generated {}", display_relative(&path).display());
        Ok(path)
    }

    /// Fetch and process only, for inspection.
    pub async fn list_nodes(&self) -> Result<Vec<NodeCandidate>> {
        self.build_nodes().await
    }

    /// Run the first cycle, start sing-box, then re-run the cycle on every
    /// update tick and restart sing-box only when the config changed.
    ///
    /// A failed first cycle aborts startup. Later failures are logged and
    /// retried on the next tick. Cycles never overlap: ticks that fall due
    /// while a cycle is running are skipped. Returns on Ctrl-C or SIGTERM
    /// after stopping sing-box.
    pub async fn run_daemon(&self, supervisor: &mut ProcessSupervisor) -> Result<()> {
        self.run_daemon_until(supervisor, shutdown_signal()).await
    }

    /// `run_daemon` with a caller-supplied shutdown future.
    pub async fn run_daemon_until<F>(&self, supervisor: &mut ProcessSupervisor, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.update_period();
        ensure_dir(&self.config.sing_box.work_dir).await?;

        self.update().await?;
        supervisor.start(&self.config.sing_box.config_path, &self.config.sing_box.bin)?;

        let first_tick = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Proxy CLI running, updating every {:?}.", period);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.update().await {
                        Ok(true) => {
                            info!("Configuration updated, restarting sing-box.");
                            if let Err(e) = supervisor.start(&self.config.sing_box.config_path, &self.config.sing_box.bin) {
                                error!("Failed to restart sing-box: {}", e);
                            }
                        }
                        Ok(false) => info!("Configuration unchanged."),
                        Err(e) => error!("Update failed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping sing-box.");
                    supervisor.stop();
                    return Ok(());
                }
            }
        }
    }
}

fn display_relative(path: &Path) -> PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
