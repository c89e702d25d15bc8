//! Remove orphaned registry rows past the retention window

use clap::Args;
use colored::Colorize;

use super::{print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct PruneOrphansCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Server to prune (default: every server in the inventory)
    #[arg(long)]
    pub server: Option<i32>,
}

impl PruneOrphansCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let pruned = rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let mut pruned = Vec::new();
            for server_id in engine.server_ids(self.server)? {
                let server = engine.server(server_id).await?;
                pruned.push((server_id, engine.reconciler.prune_orphans(&server).await?));
            }
            Ok::<_, anyhow::Error>(pruned)
        })?;

        match self.engine.output_format {
            OutputFormat::Json => print_json(
                &pruned
                    .iter()
                    .map(|(server_id, count)| serde_json::json!({ "server_id": server_id, "pruned": count }))
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => {
                for (server_id, count) in pruned {
                    println!(
                        "Server {}: {} orphaned network(s) pruned",
                        server_id,
                        count.to_string().bright_cyan()
                    );
                }
                Ok(())
            }
        }
    }
}
