//! mh-engine: provider fan-out, field merge, and request coalescing.
//!
//! The [`Engine`] turns a raw lookup key into a [`CanonicalRecord`] by
//! consulting the store, the configured [`Provider`]s, or both. Providers are
//! plain async trait objects; [`HttpProvider`] covers JSON-over-HTTP upstreams.
//!
//! [`CanonicalRecord`]: mh_core::CanonicalRecord

pub mod engine;
pub mod http_provider;
mod inflight;
pub mod merge;
pub mod outcome;
pub mod provider;
pub mod registry;

pub use engine::{Engine, ResolveOptions};
pub use http_provider::HttpProvider;
pub use outcome::{Origin, ProviderFailure, Resolution, ResolutionOutcome, ResolveError};
pub use provider::{Provider, ProviderError, ProviderErrorKind};
pub use registry::{ProviderInfo, ProviderSet};
