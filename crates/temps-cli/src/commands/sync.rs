//! Drift repair and reverse sync for one or every server

use clap::Args;
use colored::Colorize;
use temps_networks::ServerSyncReport;
use tracing::warn;

use super::{print_heading, print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct SyncCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Server to sync (default: every server in the inventory)
    #[arg(long)]
    pub server: Option<i32>,
}

impl SyncCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let (reports, failures) = rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let mut reports = Vec::new();
            let mut failures = 0;
            for server_id in engine.server_ids(self.server)? {
                match engine.service.sync_server(server_id).await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        warn!(server_id, "Sync failed: {}", e);
                        failures += 1;
                    }
                }
            }
            Ok::<_, anyhow::Error>((reports, failures))
        })?;

        match self.engine.output_format {
            OutputFormat::Json => print_json(&reports)?,
            OutputFormat::Text => {
                for report in &reports {
                    print_report(report);
                }
                println!();
            }
        }

        if failures > 0 {
            anyhow::bail!("{} server(s) could not be synced", failures);
        }
        Ok(())
    }
}

fn print_report(report: &ServerSyncReport) {
    print_heading(&format!("Server {}", report.server_id));
    let drift = &report.drift;
    println!(
        "  {} checked {}, refreshed {}, recreated {} (reattached {}), orphaned {}",
        "Drift:".bright_white(),
        drift.checked,
        drift.refreshed,
        drift.recreated.to_string().bright_cyan(),
        drift.reattached,
        drift.orphaned
    );
    if drift.failed > 0 || drift.unreachable > 0 {
        println!(
            "  {} {} failed, {} unreachable",
            "Problems:".bright_red(),
            drift.failed,
            drift.unreachable
        );
    }
    println!(
        "  {} seen {}, discovered {}, refreshed {}",
        "Engine:".bright_white(),
        report.reverse.seen,
        report.reverse.discovered.to_string().bright_cyan(),
        report.reverse.refreshed
    );
}
