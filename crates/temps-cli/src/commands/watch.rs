//! Long-running drift monitor

use clap::Args;
use std::time::Duration;
use temps_networks::DriftMonitor;
use tracing::info;

use super::{Engine, EngineArgs};

#[derive(Args)]
pub struct WatchCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Seconds between drift checks (default: drift_check_interval)
    #[arg(long)]
    pub interval: Option<u64>,
}

impl WatchCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let interval = self
                .interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| engine.reconciler.settings().drift_check_interval());

            let monitor = DriftMonitor::new(
                engine.catalog.clone(),
                engine.scheduler.clone(),
                interval,
            );
            // First pass right away, then on the interval
            monitor.tick().await;

            tokio::select! {
                _ = monitor.start() => {}
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!(
                        in_flight = engine.scheduler.in_flight_count().await,
                        "Shutting down drift monitor"
                    );
                }
            }
            Ok::<_, anyhow::Error>(())
        })
    }
}
