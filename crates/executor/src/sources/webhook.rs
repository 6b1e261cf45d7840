use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation naming the handler (and its arguments) for an alert.
pub const HANDLER_ANNOTATION: &str = "handler";

// AlertManager webhook payload structures
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertManagerEvent {
    pub version: String,
    #[serde(rename = "groupKey")]
    pub group_key: String,
    #[serde(rename = "truncatedAlerts")]
    pub truncated_alerts: u64,
    pub status: String,
    pub receiver: String,
    #[serde(rename = "groupLabels")]
    pub group_labels: BTreeMap<String, String>,
    #[serde(rename = "commonLabels")]
    pub common_labels: BTreeMap<String, String>,
    #[serde(rename = "commonAnnotations")]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub alerts: Vec<Alert>,
}

impl AlertManagerEvent {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

/// A single alert from an Alertmanager webhook payload.
///
/// `timestamp` is stamped when the alert is processed and is never read from
/// the payload. `argv` and `json` are transient and only exist so a handler
/// template can reach them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Alert {
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    #[serde(rename = "startsAt")]
    pub starts_at: String,
    #[serde(rename = "endsAt")]
    pub ends_at: String,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    #[serde(skip_deserializing)]
    pub timestamp: String,

    #[serde(skip)]
    pub argv: Vec<String>,
    #[serde(skip)]
    pub json: String,
}

impl Alert {
    pub fn name(&self) -> &str {
        self.labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Raw value of the `handler` annotation, if present.
    pub fn handler_annotation(&self) -> Option<&str> {
        self.annotations.get(HANDLER_ANNOTATION).map(String::as_str)
    }

    /// Stamp the processing time and snapshot the alert as JSON.
    ///
    /// Must run before `argv` is populated; `argv` is never serialized anyway.
    pub fn stamp(&mut self) -> serde_json::Result<()> {
        self.timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.json = serde_json::to_string(self)?;
        Ok(())
    }

    /// Values exposed to handler command templates, keyed by field name.
    pub fn template_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("Status", Value::from(self.status.as_str())),
            ("Labels", string_map(&self.labels)),
            ("Annotations", string_map(&self.annotations)),
            ("StartsAt", Value::from(self.starts_at.as_str())),
            ("EndsAt", Value::from(self.ends_at.as_str())),
            ("GeneratorURL", Value::from(self.generator_url.as_str())),
            ("Timestamp", Value::from(self.timestamp.as_str())),
            ("Argv", Value::from(self.argv.clone())),
            ("Json", Value::from(self.json.as_str())),
        ]
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect(),
    )
}
