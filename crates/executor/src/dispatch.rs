//! Alert dispatch: turns each alert of an event into handler invocations.
//!
//! Every alert runs its primary handler (named by the `handler` annotation,
//! or the `default` handler when there is none) followed by the trailing
//! meta-handlers, `all` by default. Failures are local to one invocation and
//! are collected into the report rather than aborting the event.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::argv::{self, TokenizeError};
use crate::exec::{CommandRunner, ExecError, ExecOutcome};
use crate::handler::{Handlers, Resolution, ResolveError, ALL_HANDLER, DEFAULT_HANDLER};
use crate::metrics;
use crate::sources::{Alert, AlertManagerEvent};
use crate::template::{self, TemplateError};

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("error marshalling JSON: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("empty handler annotation found in alert")]
    EmptyHandler,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("could not render handler arguments: {0}")]
    Template(#[from] TemplateError),
    #[error("could not parse handler command: {0}")]
    Tokenize(#[from] TokenizeError),
    #[error("command is empty, not running")]
    EmptyCommand,
    #[error("{0}")]
    Exec(#[from] ExecError),
}

/// Ordered handler-resolution policy applied to every alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Handler used when the alert names none.
    pub fallback: String,
    /// Handlers invoked after the primary one, in order.
    pub trailing: Vec<String>,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            fallback: DEFAULT_HANDLER.to_string(),
            trailing: vec![ALL_HANDLER.to_string()],
        }
    }
}

impl Chain {
    /// Meta-handlers are optional: a missing definition is not an error.
    pub fn is_meta(&self, name: &str) -> bool {
        name == self.fallback || self.trailing.iter().any(|t| t == name)
    }

    /// Tokenized handler invocations for `alert`, in execution order.
    pub fn invocations(&self, alert: &Alert) -> Vec<Vec<String>> {
        let primary = match alert.handler_annotation() {
            Some(annotation) => annotation.split_whitespace().map(String::from).collect(),
            None => {
                info!(
                    alert = alert.name(),
                    "alert has no handler annotation, trying {}", self.fallback
                );
                vec![self.fallback.clone()]
            }
        };
        std::iter::once(primary)
            .chain(self.trailing.iter().map(|name| vec![name.clone()]))
            .collect()
    }
}

/// Aggregated output of one event.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub output: Vec<u8>,
    pub errors: usize,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    fn record_error(&mut self, err: &InvocationError) {
        error!("{err}");
        self.output.extend_from_slice(err.to_string().as_bytes());
        self.output.push(b'\n');
        self.errors += 1;
    }
}

pub struct Dispatcher {
    handlers: Arc<Handlers>,
    runner: Arc<dyn CommandRunner>,
    chain: Chain,
}

impl Dispatcher {
    pub fn new(handlers: Arc<Handlers>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            handlers,
            runner,
            chain: Chain::default(),
        }
    }

    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    /// Process every alert of `event` sequentially.
    pub async fn dispatch(&self, event: AlertManagerEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for mut alert in event.alerts {
            info!(alert = alert.name(), status = %alert.status, "processing alert");
            metrics::ALERTS_PROCESSED_TOTAL.inc();

            if let Err(e) = alert.stamp() {
                report.record_error(&InvocationError::from(e));
                continue;
            }

            for handler in self.chain.invocations(&alert) {
                match self.invoke(&handler, &alert).await {
                    Ok(output) => report.output.extend_from_slice(&output),
                    Err((InvocationError::Resolve(ResolveError::Missing(name)), _))
                        if self.chain.is_meta(&name) =>
                    {
                        metrics::record_invocation("missing");
                    }
                    Err((err, output)) => {
                        metrics::record_invocation("failed");
                        report.record_error(&err);
                        report.output.extend_from_slice(&output);
                    }
                }
            }
        }

        report
    }

    /// Run one handler for one alert. On failure, any output the command
    /// produced before failing is returned alongside the error.
    async fn invoke(
        &self,
        handler: &[String],
        alert: &Alert,
    ) -> Result<Vec<u8>, (InvocationError, Vec<u8>)> {
        let fail = |e: InvocationError| (e, Vec::new());

        let name = handler.first().ok_or_else(|| fail(InvocationError::EmptyHandler))?;
        let spec = match self.handlers.resolve(name, alert).map_err(|e| fail(e.into()))? {
            Resolution::Run(spec) => spec,
            Resolution::Skip => {
                metrics::record_invocation("filtered");
                return Ok(Vec::new());
            }
        };

        let command = template::render(handler, &spec.command, alert).map_err(|e| fail(e.into()))?;
        let tokens = argv::tokenize(&command).map_err(|e| fail(e.into()))?;
        let (program, args) = tokens
            .split_first()
            .ok_or_else(|| fail(InvocationError::EmptyCommand))?;

        let report = self.runner.run(program, args).await;
        match report.outcome {
            ExecOutcome::Skipped => {
                metrics::record_invocation("skipped");
                Ok(report.output)
            }
            ExecOutcome::Succeeded => {
                metrics::record_invocation("succeeded");
                Ok(report.output)
            }
            ExecOutcome::Failed(e) => Err((e.into(), report.output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecReport, MockCommandRunner};
    use crate::sources::webhook::HANDLER_ANNOTATION;
    use mockall::Sequence;
    use std::time::Duration;

    const CONFIG: &str = r#"
handlers:
  echo:
    command: echo {{ .Labels.alertname }} {{ index .Argv 0 }}
  quoted:
    command: printf "%s|" {{ .Argv.0 }} "two words"
  unbalanced:
    command: echo "oops
  on-resolve:
    command: close {{ .Labels.alertname }}
    status: resolved
  empty:
    command: "   "
"#;

    fn alert(status: &str, handler: Option<&str>) -> Alert {
        let mut alert = Alert {
            status: status.into(),
            ..Default::default()
        };
        alert.labels.insert("alertname".into(), "HighLoad".into());
        if let Some(handler) = handler {
            alert.annotations.insert(HANDLER_ANNOTATION.into(), handler.into());
        }
        alert
    }

    fn event(alerts: Vec<Alert>) -> AlertManagerEvent {
        AlertManagerEvent {
            alerts,
            ..Default::default()
        }
    }

    fn dispatcher(config: &str, runner: MockCommandRunner) -> Dispatcher {
        let handlers = Arc::new(Handlers::from_yaml(config).unwrap());
        Dispatcher::new(handlers, Arc::new(runner))
    }

    fn succeed(output: &str) -> ExecReport {
        ExecReport {
            output: output.as_bytes().to_vec(),
            outcome: ExecOutcome::Succeeded,
        }
    }

    fn text(report: &DispatchReport) -> String {
        String::from_utf8_lossy(&report.output).into_owned()
    }

    #[tokio::test]
    async fn test_runs_named_handler_with_arguments() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "echo" && args == ["HighLoad", "web1"])
            .times(1)
            .returning(|_, _| succeed("HighLoad web1\n"));

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("echo web1"))]))
            .await;
        assert!(report.is_success());
        assert_eq!(text(&report), "HighLoad web1\n");
    }

    #[tokio::test]
    async fn test_rendered_command_is_tokenized() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "printf" && args == ["%s|", "web1", "two words"])
            .times(1)
            .returning(|_, _| succeed(""));

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("quoted web1"))]))
            .await;
        assert!(report.is_success());
        assert!(report.output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_annotation_without_default_is_noop() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", None)]))
            .await;
        assert!(report.is_success());
        assert!(report.output.is_empty());
    }

    #[tokio::test]
    async fn test_missing_named_handler_is_error() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("nope arg"))]))
            .await;
        assert_eq!(report.errors, 1);
        assert!(text(&report).contains("handler nope is not defined"));
    }

    #[tokio::test]
    async fn test_status_filter_skips_silently() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("on-resolve"))]))
            .await;
        assert!(report.is_success());
        assert!(report.output.is_empty());
    }

    #[tokio::test]
    async fn test_default_then_all_in_order() {
        let config = r#"
handlers:
  default:
    command: first
    status: "*"
  all:
    command: second {{ .Status }}
    status: "*"
"#;
        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args| program == "first" && args.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| succeed("1\n"));
        runner
            .expect_run()
            .withf(|program, args| program == "second" && args == ["resolved"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| succeed("2\n"));

        let report = dispatcher(config, runner)
            .dispatch(event(vec![alert("resolved", None)]))
            .await;
        assert!(report.is_success());
        assert_eq!(text(&report), "1\n2\n");
    }

    #[tokio::test]
    async fn test_all_runs_after_named_handler() {
        let config = format!("{CONFIG}  all:\n    command: audit\n");
        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "echo")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| succeed(""));
        runner
            .expect_run()
            .withf(|program, _| program == "audit")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| succeed(""));

        let report = dispatcher(&config, runner)
            .dispatch(event(vec![alert("firing", Some("echo x"))]))
            .await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_tokenize_failure_is_counted() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("unbalanced"))]))
            .await;
        assert_eq!(report.errors, 1);
        assert!(text(&report).contains("missing closing quote"));
    }

    #[tokio::test]
    async fn test_template_failure_is_counted() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        // `echo` requires one argument
        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("echo"))]))
            .await;
        assert_eq!(report.errors, 1);
        assert!(text(&report).contains("template execution failed"));
    }

    #[tokio::test]
    async fn test_empty_annotation_and_command() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("   ")), alert("firing", Some("empty"))]))
            .await;
        assert_eq!(report.errors, 2);
        let text = text(&report);
        assert!(text.contains("empty handler annotation"));
        assert!(text.contains("command is empty"));
    }

    #[tokio::test]
    async fn test_exec_failure_keeps_output_and_continues() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "echo")
            .times(2)
            .returning(|_, args| {
                if args[1] == "bad" {
                    ExecReport {
                        output: b"partial\n".to_vec(),
                        outcome: ExecOutcome::Failed(ExecError::NonZeroExit(2)),
                    }
                } else {
                    succeed("ok\n")
                }
            });

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![
                alert("firing", Some("echo bad")),
                alert("firing", Some("echo good")),
            ]))
            .await;
        assert_eq!(report.errors, 1);
        assert_eq!(
            text(&report),
            "process exited with non-zero code: 2\npartial\nok\n"
        );
    }

    #[tokio::test]
    async fn test_timeout_text() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| ExecReport::failed(ExecError::TimedOut(Duration::from_secs(1))));

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("echo slow"))]))
            .await;
        assert!(!report.is_success());
        assert!(text(&report).contains("timed out"));
    }

    #[tokio::test]
    async fn test_skipped_execution_is_success() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| ExecReport::skipped());

        let report = dispatcher(CONFIG, runner)
            .dispatch(event(vec![alert("firing", Some("echo x"))]))
            .await;
        assert!(report.is_success());
        assert!(report.output.is_empty());
    }

    #[tokio::test]
    async fn test_custom_chain() {
        let config = "handlers:\n  fallback:\n    command: fb\n  audit:\n    command: audit\n";
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, _| program == "fb" || program == "audit")
            .times(2)
            .returning(|_, _| succeed(""));

        let chain = Chain {
            fallback: "fallback".into(),
            trailing: vec!["audit".into(), "missing-meta".into()],
        };
        let report = dispatcher(config, runner)
            .with_chain(chain)
            .dispatch(event(vec![alert("firing", None)]))
            .await;
        assert!(report.is_success());
    }

    #[test]
    fn test_chain_invocations() {
        let chain = Chain::default();
        assert_eq!(
            chain.invocations(&alert("firing", Some("restart  nginx  now"))),
            vec![vec!["restart", "nginx", "now"], vec!["all"]]
        );
        assert_eq!(
            chain.invocations(&alert("firing", None)),
            vec![vec!["default"], vec!["all"]]
        );
        assert!(chain.is_meta("default"));
        assert!(chain.is_meta("all"));
        assert!(!chain.is_meta("restart"));
    }
}
