use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use mh_core::config::{Config, DatabaseConfig};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Parser)]
#[command(name = "metahub")]
#[command(
    author,
    version = version_string(),
    about = "Metadata lookup service aggregating multiple upstream providers"
)]
pub struct Cli {
    /// Path to JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve(ServeArgs),

    /// Provision or update the store schema, then exit
    Migrate(DbArgs),

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind to (default: all interfaces)
    #[arg(long, env = "BIND")]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Shared bearer token required on /v1 routes
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(flatten)]
    pub db: DbArgs,
}

impl ServeArgs {
    /// Layer flags over the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref bind) = self.bind {
            config.server.host = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref token) = self.token {
            config.auth.token = Some(token.clone());
        }
        self.db.apply(&mut config.database);
    }
}

#[derive(Args, Debug, Default)]
pub struct DbArgs {
    /// SQLite database path (empty for in-memory)
    #[arg(long, env = "DSN", hide_env_values = true)]
    pub dsn: Option<String>,

    /// Idle connections kept in the pool
    #[arg(long, env = "DB_MAX_IDLE_CONNS")]
    pub db_max_idle_conns: Option<u32>,

    /// Maximum open connections
    #[arg(long, env = "DB_MAX_OPEN_CONNS")]
    pub db_max_open_conns: Option<u32>,

    /// Provision the schema at startup
    #[arg(
        long,
        env = "DB_AUTO_MIGRATE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub db_auto_migrate: Option<bool>,

    /// Cache prepared statements
    #[arg(
        long,
        env = "DB_PREPARED_STMT",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub db_prepared_stmt: Option<bool>,
}

impl DbArgs {
    pub fn apply(&self, db: &mut DatabaseConfig) {
        if let Some(ref dsn) = self.dsn {
            db.dsn = dsn.clone();
        }
        if let Some(n) = self.db_max_idle_conns {
            db.max_idle_conns = n;
        }
        if let Some(n) = self.db_max_open_conns {
            db.max_open_conns = n;
        }
        if let Some(on) = self.db_auto_migrate {
            db.auto_migrate = on;
        }
        if let Some(on) = self.db_prepared_stmt {
            db.prepared_stmt = on;
        }
    }
}

/// `{crate version}-{git commit}`; the commit comes from `GIT_COMMIT` at
/// build time. Shared by `--version` and the `version` subcommand.
pub fn version_string() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        format!(
            "{}-{}",
            env!("CARGO_PKG_VERSION"),
            option_env!("GIT_COMMIT").unwrap_or("unknown")
        )
    })
}
