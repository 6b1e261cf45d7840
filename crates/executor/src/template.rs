//! Template rendering utilities using Tera
//!
//! Handler commands are written in a Go-template flavoured syntax
//! (`{{ .Labels.instance }}`, `{{ index .Argv 0 }}`, `{{ replace .Json "a" "b" }}`).
//! This module converts the common forms to Tera syntax and renders the
//! result against a single alert.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tera::{Context, Tera, Value};
use thiserror::Error;
use tracing::error;

use crate::sources::Alert;

const TEMPLATE_NAME: &str = "command";

/// Printed for a label or annotation the alert does not carry.
pub const NO_VALUE: &str = "<no value>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template parsing failed for {template:?}: {cause}")]
    Parse { template: String, cause: String },
    #[error("template execution failed for {template:?}: {cause}")]
    Render { template: String, cause: String },
}

const GO_STRING: &str = r#""(?:[^"\\]|\\.)*""#;
const GO_PATH: &str = r"\.?([A-Za-z_][\w.]*)";

lazy_static! {
    static ref REPLACE_CALL: Regex = Regex::new(&format!(
        r"\{{\{{\s*replace\s+{GO_PATH}\s+({GO_STRING})\s+({GO_STRING})\s*\}}\}}"
    ))
    .expect("replace pattern is valid");
    static ref INDEX_POSITION: Regex =
        Regex::new(&format!(r"\{{\{{\s*index\s+{GO_PATH}\s+(\d+)\s*\}}\}}"))
            .expect("index pattern is valid");
    static ref INDEX_KEY: Regex =
        Regex::new(&format!(r"\{{\{{\s*index\s+{GO_PATH}\s+({GO_STRING})\s*\}}\}}"))
            .expect("index pattern is valid");
    static ref DEFAULT_DOUBLE: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+"([^"]+)"\s*\}\}"#).expect("default pattern is valid");
    static ref DEFAULT_SINGLE: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+'([^']+)'\s*\}\}"#).expect("default pattern is valid");
    static ref MAP_FIELD: Regex =
        Regex::new(r"\{\{(\s*)((?:Labels|Annotations)\.\w+)(\s*)\}\}").expect("field pattern is valid");
    static ref DEFAULT_BARE: Regex =
        Regex::new(r#"\{\{([^}]+)\|\s*default\s+([^}\s]+)\s*\}\}"#).expect("default pattern is valid");
}

/// Decode a double-quoted Go string literal, quotes included.
fn decode_go_string(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Tera string literals have no escapes, so pick a delimiter the value lacks.
fn tera_string(value: &str) -> Option<String> {
    ['"', '\'', '`']
        .into_iter()
        .find(|delim| !value.contains(*delim))
        .map(|delim| format!("{delim}{value}{delim}"))
}

/// Convert Go template syntax to Tera syntax
///
/// Handles common patterns:
/// - {{ .path.to.value }} -> {{ path.to.value }}
/// - {{ index .Argv 0 }} -> {{ Argv.0 }}
/// - {{ index .Labels "key" }} -> {{ Labels["key"] | default(value="") }}
/// - {{ .Labels.key }} -> {{ Labels.key | default(value="<no value>") }}
/// - {{ replace .Json "a" "b" }} -> {{ replace(subject=Json, old="a", new="b") }}
/// - {{ .value | default "default" }} -> {{ value | default(value="default") }}
///
/// A missing label or annotation renders as Go does: `<no value>` through a
/// field lookup and an empty string through `index`.
pub fn convert_go_to_tera(template: &str) -> String {
    let converted = REPLACE_CALL.replace_all(template, |caps: &Captures| {
        let old = tera_string(&decode_go_string(&caps[2]));
        let new = tera_string(&decode_go_string(&caps[3]));
        match (old, new) {
            (Some(old), Some(new)) => {
                format!("{{{{ replace(subject={}, old={old}, new={new}) }}}}", &caps[1])
            }
            _ => caps[0].to_string(),
        }
    });
    let converted = INDEX_POSITION.replace_all(&converted, "{{ $1.$2 }}");
    let converted = INDEX_KEY.replace_all(&converted, |caps: &Captures| {
        match tera_string(&decode_go_string(&caps[2])) {
            Some(key) if is_alert_map(&caps[1]) => {
                format!("{{{{ {}[{key}] | default(value=\"\") }}}}", &caps[1])
            }
            Some(key) => format!("{{{{ {}[{key}] }}}}", &caps[1]),
            None => caps[0].to_string(),
        }
    });

    let converted = converted.replace("{{ .", "{{ ").replace("{{.", "{{");
    let converted = MAP_FIELD.replace_all(&converted, |caps: &Captures| {
        format!("{{{{{}{} | default(value=\"{NO_VALUE}\"){}}}}}", &caps[1], &caps[2], &caps[3])
    });

    let converted = DEFAULT_DOUBLE.replace_all(&converted, "{{$1| default(value=\"$2\") }}");
    let converted = DEFAULT_SINGLE.replace_all(&converted, "{{$1| default(value=\"$2\") }}");
    DEFAULT_BARE
        .replace_all(&converted, "{{$1| default(value=\"$2\") }}")
        .into_owned()
}

fn is_alert_map(path: &str) -> bool {
    matches!(path, "Labels" | "Annotations")
}

/// Global substring replacement: `replace(subject=.., old=.., new=..)`.
fn replace(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let arg = |name: &str| -> tera::Result<String> {
        let value = args
            .get(name)
            .ok_or_else(|| tera::Error::msg(format!("replace: missing argument `{name}`")))?;
        tera::from_value(value.clone())
            .map_err(|_| tera::Error::msg(format!("replace: argument `{name}` must be a string")))
    };
    let subject = arg("subject")?;
    Ok(Value::from(subject.replace(&arg("old")?, &arg("new")?)))
}

fn cause_chain(err: &tera::Error) -> String {
    let mut cause = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        cause.push_str(": ");
        cause.push_str(&inner.to_string());
        source = inner.source();
    }
    cause
}

/// Render a handler command template for one alert.
///
/// `handler` is the tokenized handler annotation; everything after the
/// handler name becomes the alert's `Argv`.
pub fn render(handler: &[String], template: &str, alert: &Alert) -> Result<String, TemplateError> {
    let mut alert = alert.clone();
    alert.argv = handler.get(1..).unwrap_or_default().to_vec();

    let mut tera = Tera::default();
    tera.register_function("replace", replace);
    tera.add_raw_template(TEMPLATE_NAME, &convert_go_to_tera(template))
        .map_err(|e| {
            let cause = cause_chain(&e);
            error!(template, %cause, "template parsing failed");
            TemplateError::Parse {
                template: template.to_string(),
                cause,
            }
        })?;

    let mut context = Context::new();
    for (key, value) in alert.template_fields() {
        context.insert(key, &value);
    }

    tera.render(TEMPLATE_NAME, &context).map_err(|e| {
        let cause = cause_chain(&e);
        error!(template, %cause, "template execution failed");
        TemplateError::Render {
            template: template.to_string(),
            cause,
        }
    })
}
