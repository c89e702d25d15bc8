pub mod list;
pub mod orphans;
pub mod proxy;
pub mod reconcile;
pub mod shared;
pub mod sync;
pub mod watch;

pub use list::ListCommand;
pub use orphans::PruneOrphansCommand;
pub use proxy::MigrateProxyCommand;
pub use reconcile::ReconcileCommand;
pub use shared::{CreateSharedCommand, DeleteCommand};
pub use sync::SyncCommand;
pub use watch::WatchCommand;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use temps_networks::{
    NetworkReconciler, NetworkService, NetworkSettings, ReconcileScheduler, ResourceCatalog,
    Server, ShellExecutor, SwarmProbe,
};
use tracing::debug;

use crate::inventory::{Inventory, InventoryCatalog};

/// Output format shared by every command
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Text,
    /// JSON output for automation and scripting
    Json,
}

/// Where the engine finds its servers and registry
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Path to the YAML server inventory
    #[arg(long, env = "TEMPS_NETWORKS_INVENTORY", default_value = "inventory.yaml")]
    pub inventory: PathBuf,

    /// Database connection URL (overrides the inventory)
    #[arg(long, env = "TEMPS_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Output format: text or json
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

/// A fully wired engine over the inventory
pub struct Engine {
    pub inventory: Inventory,
    pub catalog: Arc<InventoryCatalog>,
    pub reconciler: Arc<NetworkReconciler>,
    pub scheduler: ReconcileScheduler,
    pub service: Arc<NetworkService>,
}

impl Engine {
    pub async fn connect(args: &EngineArgs) -> anyhow::Result<Self> {
        let inventory = Inventory::load(&args.inventory)?;
        let database_url = args
            .database_url
            .clone()
            .or_else(|| inventory.database_url.clone())
            .context("No database URL: pass --database-url or set database_url in the inventory")?;

        debug!("Connecting to registry database...");
        let db = temps_database::establish_connection(&database_url).await?;

        let settings: NetworkSettings = inventory.settings.clone();
        let executor = Arc::new(ShellExecutor::new());
        let catalog = Arc::new(InventoryCatalog::new(&inventory));
        let cluster = Arc::new(SwarmProbe::new(
            executor.clone(),
            settings.command_timeout(),
        ));

        let reconciler = Arc::new(NetworkReconciler::new(
            db,
            executor,
            catalog.clone(),
            cluster,
            settings.clone(),
        ));
        let scheduler = ReconcileScheduler::new(reconciler.clone(), &settings);
        let service = Arc::new(NetworkService::new(reconciler.clone(), scheduler.clone()));

        Ok(Self {
            inventory,
            catalog,
            reconciler,
            scheduler,
            service,
        })
    }

    pub async fn server(&self, server_id: i32) -> anyhow::Result<Server> {
        Ok(self.catalog.find_server(server_id).await?)
    }

    /// The given server, or every server in the inventory
    pub fn server_ids(&self, server_id: Option<i32>) -> anyhow::Result<Vec<i32>> {
        match server_id {
            Some(id) => {
                if !self.inventory.servers.iter().any(|s| s.id == id) {
                    anyhow::bail!("Server {} is not in the inventory", id);
                }
                Ok(vec![id])
            }
            None => Ok(self.inventory.servers.iter().map(|s| s.id).collect()),
        }
    }
}

/// Print a serializable value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_heading(title: &str) {
    println!();
    println!("{}", title.bright_white().bold());
    println!("{}", "-".repeat(title.len()).bright_green());
}
