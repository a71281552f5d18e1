//! Limiter key derivation.

use crate::error::{FloodgateError, Result};

/// Separator between the namespace prefix and the caller identity.
const SEPARATOR: char = ':';

/// A namespaced store key for one identity.
///
/// Within a single [`KeyBuilder`] the mapping from identity to key is
/// injective: the prefix is fixed, so distinct identities yield distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey(String);

impl LimiterKey {
    /// The key as sent to the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives [`LimiterKey`]s as `prefix + ":" + identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Create a builder for the given namespace prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for `identity`.
    pub fn build(&self, identity: &str) -> Result<LimiterKey> {
        if identity.is_empty() {
            return Err(FloodgateError::Validation(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(LimiterKey(format!("{}{}{}", self.prefix, SEPARATOR, identity)))
    }

    /// A builder for a sub-namespace, e.g. one named policy.
    ///
    /// Scoped prefixes are joined with `.` rather than the key separator, so
    /// no scoped key can equal a key from the parent builder.
    pub fn scoped(&self, namespace: &str) -> Self {
        Self::new(format!("{}.{}", self.prefix, namespace))
    }
}
