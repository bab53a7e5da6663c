// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The opaque evaluation channel between a session and its execution target.
//!
//! The target is a browser tab (or a remote worker's tab) reachable over some
//! remote-debugging transport. The core never talks to that transport
//! directly; it sees the capability set below plus two inbound streams: a
//! console-message stream, where messages with well-known prefixes are
//! structured signals from the in-page agent, and an exception-event stream.

use crate::errors::ChannelError;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Prefix of console messages that announce the page is loaded and idle.
pub const SIGNAL_IDLE: &str = "TabRunner.idle";

/// Prefix of console messages that announce an in-place code upgrade applied.
pub const SIGNAL_HOT_RELOAD: &str = "TabRunner.hotReload";

/// Prefix of console messages that carry a test result as JSON.
pub const SIGNAL_RESULTS: &str = "TabRunner.results";

/// Builds the expression dispatching a test to the in-page agent.
pub(crate) fn run_expression(test_name: &str, run_id: u64) -> String {
    let args = serde_json::json!({ "testName": test_name, "runId": run_id });
    format!("TabRunner.run({args})")
}

/// Builds the expression applying an in-place code upgrade.
pub(crate) fn upgrade_expression(code_version: &str) -> String {
    format!("TabRunner.upgrade({})", Value::from(code_version))
}

/// The expression listing all fully-qualified test names the page defines.
pub(crate) const TEST_NAMES_EXPRESSION: &str = "TabRunner.testNames()";

/// Control capabilities over one browser tab.
///
/// Implementations wrap a real remote-debugging connection; tests use
/// scripted fakes. `next_event` must be cancel-safe: the driver polls it
/// inside a `select!` and may drop the future between events.
pub trait PageChannel: Send {
    /// Navigates the tab to the given URL.
    fn navigate(&mut self, url: &str) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Reloads the tab.
    fn reload(&mut self) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Evaluates an expression in the page.
    fn evaluate(&mut self, expression: &str) -> BoxFuture<'_, Result<EvalOutcome, ChannelError>>;

    /// Returns the next inbound event, or `None` if the tab is gone.
    fn next_event(&mut self) -> BoxFuture<'_, Option<PageEvent>>;
}

/// An inbound event from the execution target.
#[derive(Clone, Debug)]
pub enum PageEvent {
    /// A console message was printed.
    Console(String),

    /// An uncaught exception was thrown.
    Exception(ExceptionDetails),
}

/// The outcome of evaluating an expression in the page.
#[derive(Clone, Debug, Default)]
pub struct EvalOutcome {
    /// The returned value, if the expression completed.
    pub value: Option<Value>,

    /// The exception, if the expression threw.
    pub exception: Option<ExceptionDetails>,
}

/// Details of an exception event, as reported by the debugging transport.
///
/// The shape is inherently ambiguous: a thrown value may be a typed error
/// object, a primitive, or missing entirely, and only the transport's
/// free-text `text` field is always present.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// The thrown object, if the transport captured one.
    #[serde(default)]
    pub exception: Option<RemoteObject>,

    /// Transport-provided text, e.g. "Uncaught".
    #[serde(default)]
    pub text: String,

    /// The call frames of the throw site, outermost last.
    #[serde(default)]
    pub stack_trace: Vec<StackFrame>,
}

/// A remote object captured by the debugging transport.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// The object's class name, for typed errors.
    #[serde(default)]
    pub class_name: Option<String>,

    /// The object's string description, usually `message` plus a stack.
    #[serde(default)]
    pub description: Option<String>,

    /// The raw value, for primitive throws.
    #[serde(default)]
    pub value: Option<Value>,
}

/// One frame of an exception stack trace.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// The function name, possibly empty for anonymous frames.
    #[serde(default)]
    pub function_name: String,

    /// The script URL.
    #[serde(default)]
    pub url: String,

    /// The zero-based line number.
    #[serde(default)]
    pub line_number: u64,
}

impl ExceptionDetails {
    /// Produces a one-line message attributing the exception.
    ///
    /// The fallback order is part of the upstream signal's contract: a typed
    /// exception class plus the first line of its description, else the
    /// primitive thrown value, else the transport's raw text.
    pub fn message(&self) -> String {
        if let Some(exception) = &self.exception {
            if let Some(class_name) = &exception.class_name {
                let first_line = exception
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .lines()
                    .next()
                    .unwrap_or_default();
                return format!("{class_name} {first_line}");
            }
            if let Some(value) = &exception.value {
                return value.to_string();
            }
        }
        self.text.clone()
    }

    /// Renders the stack trace as one frame per line.
    pub fn stack_string(&self) -> String {
        self.stack_trace
            .iter()
            .map(|frame| format!("{} {}:{}", frame.function_name, frame.url, frame.line_number))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A test result as emitted by the in-page agent.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// The fully-qualified test name.
    pub full_name: String,

    /// The failure, if the test did not pass.
    #[serde(default)]
    pub error: Option<PageError>,
}

/// The error portion of a [`PageResult`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageError {
    /// The error message.
    #[serde(default)]
    pub message: String,

    /// The error's stack, if one was attached.
    #[serde(default)]
    pub stack: Option<String>,
}

/// A structured signal parsed from the console stream.
#[derive(Clone, Debug)]
pub enum ConsoleSignal {
    /// The page is loaded and ready for work.
    Idle,

    /// An in-place code upgrade finished applying.
    HotReloadApplied,

    /// A dispatched test produced a result.
    Results(PageResult),
}

/// Parses a console message into a structured signal.
///
/// Messages that don't carry a known prefix are ordinary page output and
/// yield `None`. A results message with an undecodable payload also yields
/// `None`; the session's timeout will eventually recover the slot.
pub fn parse_console_signal(text: &str) -> Option<ConsoleSignal> {
    if text.starts_with(SIGNAL_RESULTS) {
        let payload = text[SIGNAL_RESULTS.len()..].trim();
        match serde_json::from_str(payload) {
            Ok(result) => return Some(ConsoleSignal::Results(result)),
            Err(error) => {
                warn!(%error, "undecodable results signal from page");
                return None;
            }
        }
    }
    if text.starts_with(SIGNAL_HOT_RELOAD) {
        return Some(ConsoleSignal::HotReloadApplied);
    }
    if text.starts_with(SIGNAL_IDLE) {
        return Some(ConsoleSignal::Idle);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn parses_results_signal() {
        let text = r#"TabRunner.results {"fullName": "suite does thing", "error": {"message": "nope", "stack": "at x"}}"#;
        let Some(ConsoleSignal::Results(result)) = parse_console_signal(text) else {
            panic!("expected results signal");
        };
        assert_eq!(result.full_name, "suite does thing");
        assert_eq!(result.error.unwrap().message, "nope");
    }

    #[test_case("TabRunner.idle" ; "bare idle")]
    #[test_case("TabRunner.idle " ; "idle with trailing space")]
    fn parses_idle_signal(text: &str) {
        assert!(matches!(
            parse_console_signal(text),
            Some(ConsoleSignal::Idle)
        ));
    }

    #[test_case("building bundle 34%" ; "ordinary output")]
    #[test_case("TabRunner.results not-json" ; "undecodable results")]
    fn ignores_unstructured_output(text: &str) {
        assert!(parse_console_signal(text).is_none());
    }

    #[test]
    fn exception_message_prefers_typed_class() {
        let details = ExceptionDetails {
            exception: Some(RemoteObject {
                class_name: Some("TypeError".to_owned()),
                description: Some("x is not a function\n  at foo.js:1".to_owned()),
                value: None,
            }),
            text: "Uncaught".to_owned(),
            stack_trace: vec![],
        };
        assert_eq!(details.message(), "TypeError x is not a function");
    }

    #[test]
    fn exception_message_falls_back_to_value_then_text() {
        let details = ExceptionDetails {
            exception: Some(RemoteObject {
                class_name: None,
                description: None,
                value: Some(Value::from("thrown a string")),
            }),
            text: "Uncaught".to_owned(),
            stack_trace: vec![],
        };
        assert_eq!(details.message(), "\"thrown a string\"");

        let details = ExceptionDetails {
            exception: None,
            text: "Uncaught (in promise)".to_owned(),
            stack_trace: vec![],
        };
        assert_eq!(details.message(), "Uncaught (in promise)");
    }

    #[test]
    fn stack_string_renders_one_frame_per_line() {
        let details = ExceptionDetails {
            exception: None,
            text: String::new(),
            stack_trace: vec![
                StackFrame {
                    function_name: "foo".to_owned(),
                    url: "http://localhost:3100/bundle.js".to_owned(),
                    line_number: 12,
                },
                StackFrame {
                    function_name: String::new(),
                    url: "http://localhost:3100/bundle.js".to_owned(),
                    line_number: 40,
                },
            ],
        };
        assert_eq!(
            details.stack_string(),
            "foo http://localhost:3100/bundle.js:12\n http://localhost:3100/bundle.js:40"
        );
    }

    #[test]
    fn run_expression_encodes_arguments() {
        assert_eq!(
            run_expression("suite \"quoted\" name", 3),
            r#"TabRunner.run({"runId":3,"testName":"suite \"quoted\" name"})"#
        );
    }
}
