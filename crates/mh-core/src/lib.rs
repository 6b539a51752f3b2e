//! mh-core: shared keys, record types, errors, and configuration.
//!
//! This crate is the foundational dependency for all other mh-* crates,
//! providing normalized identifiers, the provider/canonical record shapes,
//! a unified error type, and application configuration.

pub mod config;
pub mod error;
pub mod key;
pub mod record;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use key::{LookupKey, ProviderId};
pub use record::{field, CanonicalRecord, Fields, ProviderResult};
