//! Graph Configuration
//!
//! Runtime switches for the validation a graph performs, plus the clock used
//! to stamp events. Validation is on by default; turning it off trades early
//! diagnostics for a little less bookkeeping per update.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::GraphResult;

/// Validation switches for a [`Graph`](crate::reactive::Graph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Enforce the single-writer rules on updates:
    ///
    /// - a supplied resource is only updated by its supplier
    /// - an unsupplied resource is only updated from an action
    ///
    /// Also logs a warning when a behavior reads a resource it neither
    /// demands nor supplies.
    #[serde(default = "default_true")]
    pub validate_dependencies: bool,

    /// Enforce that static links only reach resources of the same extent or
    /// an ancestor lifetime, and that child extents are added after their
    /// parent.
    #[serde(default = "default_true")]
    pub validate_lifetimes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            validate_dependencies: true,
            validate_lifetimes: true,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_validate_dependencies(mut self, enabled: bool) -> Self {
        self.validate_dependencies = enabled;
        self
    }

    pub fn with_validate_lifetimes(mut self, enabled: bool) -> Self {
        self.validate_lifetimes = enabled;
        self
    }
}

/// Source of event timestamps, in milliseconds.
pub trait DateProvider: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock timestamps since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl DateProvider for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl<F> DateProvider for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn now(&self) -> u64 {
        self()
    }
}

pub(crate) fn system_clock() -> Arc<dyn DateProvider> {
    Arc::new(SystemClock)
}
