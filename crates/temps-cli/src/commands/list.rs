//! List managed networks from the registry

use clap::Args;
use colored::Colorize;
use temps_entities::{managed_networks, types::NetworkStatus};

use super::{print_heading, print_json, Engine, EngineArgs, OutputFormat};

#[derive(Args)]
pub struct ListCommand {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Only networks on this server
    #[arg(long)]
    pub server: Option<i32>,

    /// Only networks that are not active
    #[arg(long)]
    pub unhealthy: bool,
}

impl ListCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let networks = rt.block_on(async {
            let engine = Engine::connect(&self.engine).await?;
            let networks = engine.service.list_networks(self.server).await?;
            Ok::<_, anyhow::Error>(networks)
        })?;

        let networks: Vec<managed_networks::Model> = networks
            .into_iter()
            .filter(|n| !self.unhealthy || !n.is_active())
            .collect();

        match self.engine.output_format {
            OutputFormat::Json => print_json(&networks),
            OutputFormat::Text => {
                if networks.is_empty() {
                    println!("{}", "No managed networks.".bright_yellow());
                    return Ok(());
                }
                print_heading(&format!("Managed networks ({})", networks.len()));
                for network in &networks {
                    print_network(network);
                }
                println!();
                Ok(())
            }
        }
    }
}

fn print_network(network: &managed_networks::Model) {
    let status = match network.status {
        NetworkStatus::Active => network.status.to_string().bright_green(),
        NetworkStatus::Pending => network.status.to_string().bright_yellow(),
        _ => network.status.to_string().bright_red(),
    };
    println!(
        "{:>5}  {:<40} {:<12} {:<8} server {:<4} {}",
        network.id,
        network.docker_network_name.bright_cyan(),
        network.scope.to_string(),
        network.driver.to_string(),
        network.server_id,
        status
    );
    if let Some(error) = &network.error_message {
        println!("       {}", error.dimmed());
    }
}
