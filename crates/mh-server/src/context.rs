//! Application context shared by all request handlers.

use std::sync::Arc;

use mh_core::config::Config;
use mh_db::RecordStore;
use mh_engine::{Engine, ProviderSet};

use crate::middleware::auth::{gate_from_config, Authorizer};

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// The aggregation engine.
    pub engine: Engine,
    /// Credential check for `/v1` routes.
    pub gate: Arc<dyn Authorizer>,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(engine: Engine, gate: Arc<dyn Authorizer>, config: Config) -> Self {
        Self {
            engine,
            gate,
            config: Arc::new(config),
        }
    }

    /// Wire providers, engine, and gate from `config` over `store`.
    pub fn from_config(store: Arc<dyn RecordStore>, config: Config) -> mh_core::Result<Self> {
        let providers = ProviderSet::from_config(&config.providers)?;
        let engine = Engine::new(store, providers, config.engine.clone());
        let gate = gate_from_config(&config.auth);
        Ok(Self::new(engine, gate, config))
    }
}
