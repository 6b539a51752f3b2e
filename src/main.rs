mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, DbArgs, ServeArgs};
use mh_core::config::Config;
use mh_db::{RecordStore, SqliteStore};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "metahub=trace,mh_engine=trace,mh_server=debug,mh_db=debug,mh_core=debug,tower_http=debug"
                .to_string()
        } else {
            "metahub=info,mh_engine=info,mh_server=info,mh_db=info,mh_core=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve(args) => serve(&args, cli.config.as_deref()),
        Commands::Migrate(args) => migrate(&args, cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("metahub {}", cli::version_string());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load_or_default(path).with_context(|| match path {
        Some(p) => format!("failed to load config from {}", p.display()),
        None => "failed to load config".to_string(),
    })
}

fn serve(args: &ServeArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);

    tracing::info!("Starting metahub {}", cli::version_string());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(mh_server::start(config))?;
    Ok(())
}

fn migrate(args: &DbArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config.database);

    if config.database.is_memory() {
        tracing::warn!("Migrating an in-memory store; nothing will persist");
    }

    let store = SqliteStore::open(&config.database).context("failed to open store")?;
    store.migrate().context("migration failed")?;
    if !store.ready() {
        anyhow::bail!("store is not ready after migration");
    }

    println!("Store schema is current");
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let warnings = config.validate();

    if warnings.is_empty() {
        println!("Configuration is valid");
    } else {
        println!("Configuration has {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    println!("Providers: {}", config.providers.iter().filter(|p| p.enabled).count());
    Ok(())
}
