//! Named rate limit policies.
//!
//! A policy fixes the limit, window and algorithm for one kind of operation
//! (say `login` or `password_reset`), so call sites only supply the identity.
//! Policies are loaded from YAML:
//!
//! ```yaml
//! policies:
//!   - name: login
//!     limit: 5
//!     window_secs: 60
//!     algorithm: sliding
//!   - name: search
//!     limit: 100
//!     window_secs: 900
//!     algorithm: fixed
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::backend::Algorithm;
use super::limiter::MAX_WINDOW_SECS;
use crate::error::{FloodgateError, Result};

/// A single named policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name; letters, digits, `_` and `-` only
    pub name: String,
    /// Admissions allowed per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Algorithm override; the limiter default applies when unset
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
}

impl Policy {
    /// Create a policy that uses the limiter's default algorithm.
    pub fn new(name: impl Into<String>, limit: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            window_secs,
            algorithm: None,
        }
    }

    /// Pin the policy to an algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    fn validate(&self) -> Result<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            return Err(FloodgateError::Config(format!(
                "invalid policy name '{}'",
                self.name
            )));
        }
        if self.limit == 0 || self.window_secs == 0 {
            return Err(FloodgateError::Config(format!(
                "policy '{}' must have a positive limit and window",
                self.name
            )));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(FloodgateError::Config(format!(
                "policy '{}' window exceeds {} seconds",
                self.name, MAX_WINDOW_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<Policy>,
}

/// A validated collection of policies indexed by name.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: HashMap<String, Policy>,
}

impl PolicySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse policies: {}", e)))?;

        let mut set = PolicySet::new();
        for policy in file.policies {
            set.insert(policy)?;
        }
        Ok(set)
    }

    /// Add a policy, rejecting invalid values and duplicate names.
    pub fn insert(&mut self, policy: Policy) -> Result<()> {
        policy.validate()?;
        if self.policies.contains_key(&policy.name) {
            return Err(FloodgateError::Config(format!(
                "duplicate policy '{}'",
                policy.name
            )));
        }
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the set holds no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Iterate over the policy names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}
