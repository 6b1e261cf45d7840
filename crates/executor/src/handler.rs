//! Handler definitions and resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::sources::Alert;
use crate::Result;

/// Handler run when an alert carries no `handler` annotation.
pub const DEFAULT_HANDLER: &str = "default";
/// Handler run for every alert after its primary handler.
pub const ALL_HANDLER: &str = "all";

/// Alert status a handler reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatusFilter {
    #[default]
    Firing,
    Resolved,
    Any,
}

impl StatusFilter {
    pub fn matches(self, status: &str) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Firing => status == "firing",
            StatusFilter::Resolved => status == "resolved",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::Firing => "firing",
            StatusFilter::Resolved => "resolved",
            StatusFilter::Any => "*",
        }
    }
}

impl TryFrom<String> for StatusFilter {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "" | "firing" => Ok(StatusFilter::Firing),
            "resolved" => Ok(StatusFilter::Resolved),
            "*" => Ok(StatusFilter::Any),
            other => Err(format!(
                "invalid status filter {other:?} (valid: firing, resolved, *)"
            )),
        }
    }
}

impl From<StatusFilter> for String {
    fn from(filter: StatusFilter) -> Self {
        filter.as_str().to_string()
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Command template rendered against the alert.
    pub command: String,
    #[serde(default)]
    pub status: StatusFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("handler {0} is not defined or missing from configuration")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Run(&'a HandlerSpec),
    /// The alert status does not pass the handler's filter.
    Skip,
}

/// Immutable mapping from handler name to its configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handlers {
    #[serde(default)]
    handlers: BTreeMap<String, HandlerSpec>,
}

impl Handlers {
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load handler definitions from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let handlers = Self::from_yaml(&source)?;
        for (name, spec) in handlers.iter() {
            info!(handler = %name, command = %spec.command, status = %spec.status, "found handler");
        }
        Ok(handlers)
    }

    pub fn get(&self, name: &str) -> Option<&HandlerSpec> {
        self.handlers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HandlerSpec)> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up `name` and apply its status filter to `alert`.
    pub fn resolve(&self, name: &str, alert: &Alert) -> std::result::Result<Resolution<'_>, ResolveError> {
        let spec = self
            .get(name)
            .ok_or_else(|| ResolveError::Missing(name.to_string()))?;
        if spec.status.matches(&alert.status) {
            Ok(Resolution::Run(spec))
        } else {
            info!(
                handler = name,
                status = %alert.status,
                filter = %spec.status,
                "ignoring alert, status does not match filter"
            );
            Ok(Resolution::Skip)
        }
    }
}
