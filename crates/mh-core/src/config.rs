//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, request gate, store, engine policy, and the
//! provider list. Every section defaults sensibly so a completely empty `{}`
//! file is valid. Command-line flags are layered on top by the binary.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Default deadline applied to a resolution when the caller gives none.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Ceiling applied to `request_timeout_secs` and `late_grace_secs`.
pub const MAX_ENGINE_WAIT_SECS: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    ///
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io { source: e }),
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if matches!(self.auth.token.as_deref(), Some(t) if t.trim().is_empty()) {
            warnings.push("auth.token is blank; the API is effectively open".into());
        }

        if self.engine.request_timeout_secs == 0 {
            warnings.push(
                "engine.request_timeout_secs is 0; every uncached lookup will time out".into(),
            );
        }

        for (name, secs) in [
            ("request_timeout_secs", self.engine.request_timeout_secs),
            ("late_grace_secs", self.engine.late_grace_secs),
        ] {
            if secs > MAX_ENGINE_WAIT_SECS {
                warnings.push(format!(
                    "engine.{name} ({secs}) exceeds {MAX_ENGINE_WAIT_SECS}; it will be capped"
                ));
            }
        }

        if self.database.max_open_conns > 0 && self.database.max_idle_conns > self.database.max_open_conns {
            warnings.push(format!(
                "database.max_idle_conns ({}) exceeds max_open_conns ({}); it will be capped",
                self.database.max_idle_conns, self.database.max_open_conns
            ));
        }

        let enabled: Vec<_> = self.providers.iter().filter(|p| p.enabled).collect();
        if enabled.is_empty() {
            warnings.push("no providers enabled; uncached lookups cannot succeed".into());
        }

        let mut seen = HashSet::new();
        for (i, p) in self.providers.iter().enumerate() {
            if p.url.is_empty() {
                warnings.push(format!("providers[{i}].url is empty"));
            } else if !p.url.contains("{key}") {
                warnings.push(format!(
                    "providers[{i}].url has no {{key}} placeholder; every key hits the same URL"
                ));
            }
            if !seen.insert(p.name.to_ascii_lowercase()) {
                warnings.push(format!("providers[{i}].name '{}' is duplicated", p.name));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address; empty means all interfaces.
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `host:port`, substituting the unspecified address for an empty host.
    pub fn bind_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Request gate settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret; `None` leaves the API open.
    pub token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite path; empty or `:memory:` for a private in-memory database.
    pub dsn: String,
    /// Idle connections kept warm; 0 uses the driver default.
    pub max_idle_conns: u32,
    /// Pool ceiling; 0 uses the driver default.
    pub max_open_conns: u32,
    /// Cache prepared statements per connection.
    pub prepared_stmt: bool,
    /// Provision the schema at startup.
    pub auto_migrate: bool,
    /// Test connections on creation and checkout. Off: the caller checks.
    pub auto_ping: bool,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_idle_conns: 0,
            max_open_conns: 0,
            prepared_stmt: false,
            auto_migrate: false,
            auto_ping: false,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    /// Whether the DSN selects an in-memory database.
    pub fn is_memory(&self) -> bool {
        let dsn = self.dsn.trim();
        dsn.is_empty() || dsn == ":memory:"
    }
}

/// Aggregation engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single resolution.
    pub request_timeout_secs: u64,
    /// Maximum cached-record age served without refetching; 0 disables the cache.
    pub staleness_secs: u64,
    /// How long detached provider calls may keep running past a deadline.
    pub late_grace_secs: u64,
    /// Persist provider results that arrive after the caller's deadline.
    pub backfill_late_results: bool,
    /// Abort a resolution when every waiting caller has gone away.
    pub cancel_on_disconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            staleness_secs: 24 * 60 * 60,
            late_grace_secs: 30,
            backfill_late_results: true,
            cancel_on_disconnect: true,
        }
    }
}

impl EngineConfig {
    /// Clamped to [`MAX_ENGINE_WAIT_SECS`] so it can always be added to an
    /// `Instant`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(MAX_ENGINE_WAIT_SECS))
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    /// Clamped like [`request_timeout`](Self::request_timeout).
    pub fn late_grace(&self) -> Duration {
        Duration::from_secs(self.late_grace_secs.min(MAX_ENGINE_WAIT_SECS))
    }
}

/// One upstream JSON-over-HTTP provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// URL template; `{key}` is replaced with the normalized lookup key.
    pub url: String,
    /// Merge trust weight; higher wins field conflicts.
    #[serde(default)]
    pub weight: i32,
    /// Sent as `Authorization: Bearer <api_key>` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_rate_per_second() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("weight", &self.weight)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("rate_per_second", &self.rate_per_second)
            .field("enabled", &self.enabled)
            .finish()
    }
}
