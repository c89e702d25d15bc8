//! temps-networks - operator CLI for the network reconciliation engine
//!
//! Every command loads the YAML server inventory, connects to the registry
//! database (running pending migrations) and talks to the docker engines
//! locally or over ssh.

mod commands;
mod inventory;

use clap::{Parser, Subcommand};
use commands::{
    CreateSharedCommand, DeleteCommand, ListCommand, MigrateProxyCommand, PruneOrphansCommand,
    ReconcileCommand, SyncCommand, WatchCommand,
};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TEMPS_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "TEMPS_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List managed networks
    List(ListCommand),
    /// Repair drift and import labelled engine networks
    Sync(SyncCommand),
    /// Reconcile the networks of one resource
    Reconcile(ReconcileCommand),
    /// Create a shared network
    CreateShared(CreateSharedCommand),
    /// Delete a shared, project or proxy network
    Delete(DeleteCommand),
    /// Delete orphaned networks past the retention window
    PruneOrphans(PruneOrphansCommand),
    /// Create the proxy network and attach reachable resources
    MigrateProxy(MigrateProxyCommand),
    /// Run the periodic drift monitor until interrupted
    Watch(WatchCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set; otherwise the temps crates log at --log-level
    // and database drivers only warn
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "temps_cli={level},\
             temps_networks={level},\
             temps_core={level},\
             temps_queue={level},\
             temps_database={level},\
             temps_migrations={level},\
             sqlx=warn,\
             sea_orm=warn,\
             sea_orm_migration=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::List(cmd) => cmd.execute(),
        Commands::Sync(cmd) => cmd.execute(),
        Commands::Reconcile(cmd) => cmd.execute(),
        Commands::CreateShared(cmd) => cmd.execute(),
        Commands::Delete(cmd) => cmd.execute(),
        Commands::PruneOrphans(cmd) => cmd.execute(),
        Commands::MigrateProxy(cmd) => cmd.execute(),
        Commands::Watch(cmd) => cmd.execute(),
    }
}
