//! Shared network administration

use clap::Args;
use colored::Colorize;
use temps_networks::SharedNetworkRequest;

use super::{print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct CreateSharedCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Server to create the network on
    #[arg(long)]
    pub server: i32,

    /// Owning team (default: the server's team)
    #[arg(long)]
    pub team: Option<i32>,

    /// Display name; the engine name is derived from it
    #[arg(long)]
    pub name: String,

    /// Block traffic leaving the network
    #[arg(long)]
    pub internal: bool,

    #[arg(long)]
    pub subnet: Option<String>,

    #[arg(long)]
    pub gateway: Option<String>,
}

impl CreateSharedCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let network = rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let team_id = match self.team {
                Some(team) => team,
                None => engine.server(self.server).await?.team_id,
            };
            let request = SharedNetworkRequest {
                name: self.name.clone(),
                internal: self.internal,
                subnet: self.subnet.clone(),
                gateway: self.gateway.clone(),
            };
            let network = engine
                .service
                .create_shared_network(self.server, team_id, request)
                .await?;
            Ok::<_, anyhow::Error>(network)
        })?;

        match self.engine.output_format {
            OutputFormat::Json => print_json(&network),
            OutputFormat::Text => {
                println!(
                    "{} {} (id {})",
                    "Shared network ready:".bright_green(),
                    network.docker_network_name.bright_cyan(),
                    network.id
                );
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DeleteCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Registry id of the network
    pub network_id: i32,
}

impl DeleteCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            engine.service.delete_network(self.network_id).await?;
            Ok::<_, anyhow::Error>(())
        })?;

        match self.engine.output_format {
            OutputFormat::Json => print_json(&serde_json::json!({ "deleted": self.network_id })),
            OutputFormat::Text => {
                println!("{} {}", "Deleted network".bright_green(), self.network_id);
                Ok(())
            }
        }
    }
}
