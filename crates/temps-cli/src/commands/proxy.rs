//! Move a server to proxy isolation

use clap::Args;
use colored::Colorize;

use super::{print_heading, print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct MigrateProxyCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub server: i32,
}

impl MigrateProxyCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let report = rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let report = engine.service.migrate_to_proxy_isolation(self.server).await?;
            Ok::<_, anyhow::Error>(report)
        })?;

        match self.engine.output_format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Text => {
                print_heading(&format!("Proxy network {}", report.network_name));
                println!(
                    "  {} {}",
                    "Resources attached:".bright_white(),
                    report.resources_attached.to_string().bright_cyan()
                );
                for resource in &report.failed_resources {
                    println!("  {} {}", "Failed:".bright_red(), resource);
                }
                println!();
            }
        }

        if !report.failed_resources.is_empty() {
            anyhow::bail!(
                "{} resource(s) could not be attached; rerun to retry",
                report.failed_resources.len()
            );
        }
        Ok(())
    }
}
