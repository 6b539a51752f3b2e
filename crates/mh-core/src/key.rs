//! Normalized identifier newtypes.
//!
//! [`LookupKey`] addresses one metadata record and [`ProviderId`] names one
//! upstream source. Both are immutable once built: every constructor runs the
//! type's normalization, so two keys that differ only in case or separator
//! style compare (and hash) equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Generate a validated string newtype.
///
/// The macro produces a struct with:
/// - `parse()` running the type's `normalize` function
/// - `as_str()` returning the normalized form
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Display`, `FromStr`, `AsRef<str>`
/// - `Serialize` as a plain string and `Deserialize` through `parse()`
macro_rules! normalized_id {
    ($($(#[doc = $doc:expr])* $name:ident => $normalize:path),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(try_from = "String", into = "String")]
            pub struct $name(String);

            impl $name {
                /// Normalize and validate `raw`.
                pub fn parse(raw: &str) -> Result<Self> {
                    $normalize(raw).map(Self)
                }

                /// The normalized string form.
                #[must_use]
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(s: &str) -> Result<Self> {
                    Self::parse(s)
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }

            impl TryFrom<String> for $name {
                type Error = Error;

                fn try_from(s: String) -> Result<Self> {
                    Self::parse(&s)
                }
            }

            impl From<$name> for String {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

normalized_id! {
    /// Identifier addressing one canonical record (e.g. a catalog code).
    LookupKey => normalize_key,
    /// Short lowercase name of a metadata provider.
    ProviderId => normalize_provider,
}

/// Longest accepted normalized key.
pub const MAX_KEY_LEN: usize = 64;

/// Longest accepted provider name.
pub const MAX_PROVIDER_LEN: usize = 32;

/// Uppercase, fold `_`/whitespace runs into a single `-`, strip edge dashes.
///
/// `" abc_123 "` and `"ABC--123"` both become `"ABC-123"`.
fn normalize_key(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = match c {
            '_' | '-' => '-',
            c if c.is_whitespace() => '-',
            c if c.is_ascii_alphanumeric() || c == '.' => c.to_ascii_uppercase(),
            other => {
                return Err(Error::InvalidKey(format!(
                    "unexpected character {other:?} in {raw:?}"
                )))
            }
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('-') {
        out.pop();
    }

    if out.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if out.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} characters"
        )));
    }
    Ok(out)
}

fn normalize_provider(raw: &str) -> Result<String> {
    let name = raw.trim().to_ascii_lowercase();
    if name.is_empty() || name.len() > MAX_PROVIDER_LEN {
        return Err(Error::Validation(format!(
            "provider name must be 1-{MAX_PROVIDER_LEN} characters: {raw:?}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!(
            "provider name may only contain [a-z0-9_-]: {raw:?}"
        )));
    }
    Ok(name)
}
