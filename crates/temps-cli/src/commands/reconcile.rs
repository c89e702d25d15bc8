//! Reconcile one resource, or everything on its server

use clap::Args;
use colored::Colorize;
use temps_entities::types::ResourceKind;
use temps_networks::{ReconcileOutcome, ResourceRef};

use super::{print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct ReconcileCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// application, service or database
    pub kind: String,

    pub id: i32,

    /// Sync the server first and reconcile every resource on it
    #[arg(long)]
    pub full: bool,
}

impl ReconcileCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let kind = ResourceKind::from_str(&self.kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown resource kind '{}'", self.kind))?;
        let resource = ResourceRef::new(kind, self.id);

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;

            if self.full {
                let report = engine.reconciler.reconcile_full(&resource).await?;
                match self.engine.output_format {
                    OutputFormat::Json => print_json(&report)?,
                    OutputFormat::Text => println!(
                        "{} {} resource(s), {} failed",
                        "Reconciled".bright_green(),
                        report.resources,
                        report.failed_resources.len()
                    ),
                }
                return Ok(());
            }

            match engine.reconciler.reconcile_resource(&resource).await? {
                ReconcileOutcome::Skipped(reason) => match self.engine.output_format {
                    OutputFormat::Json => {
                        print_json(&serde_json::json!({ "skipped": reason }))?
                    }
                    OutputFormat::Text => {
                        println!("{} {}", "Skipped:".bright_yellow(), reason)
                    }
                },
                ReconcileOutcome::Reconciled(report) => match self.engine.output_format {
                    OutputFormat::Json => print_json(&report)?,
                    OutputFormat::Text => println!(
                        "{} {}: {} target(s), {} engine call(s)",
                        "Reconciled".bright_green(),
                        resource,
                        report.targets,
                        report.engine_calls
                    ),
                },
            }
            Ok::<_, anyhow::Error>(())
        })
    }
}
