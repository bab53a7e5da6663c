// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tab session state machines.
//!
//! One [`TabSession`] exists per browser tab (local or on a remote worker).
//! It governs when code may be (re)loaded, when a test may be dispatched, and
//! how timeouts and exceptions are interpreted. The machine itself is
//! synchronous: it consumes [`SessionEvent`]s and returns [`SessionEffect`]s,
//! which the [driver](spawn_session) executes against the opaque
//! [`PageChannel`](channel::PageChannel). That keeps every transition
//! table-testable without a real execution target.

pub mod channel;
mod driver;
#[cfg(test)]
pub(crate) mod test_support;

pub use driver::{SessionHandle, spawn_session};

use crate::{
    config::{SessionTimeouts, TabConfig},
    errors::{ChannelError, ListTestsError},
    time::StopwatchStart,
};
use channel::{ConsoleSignal, EvalOutcome, PageResult};
use std::time::Duration;
use tabrunner_metadata::TestResult;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The error message synthesized when a running test produces no result
/// before the session's run timeout fires.
///
/// Distinguished from a genuine assertion failure only by this message.
pub const TEST_TIMEOUT_ERROR: &str = "browser-level test timeout";

/// A single test dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestSpec {
    /// The fully-qualified test name.
    pub test_name: String,

    /// The run generation the result should be tagged with.
    pub run_id: u64,
}

/// The states a session moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TabState {
    /// The tab was told to navigate or reload and hasn't signaled readiness.
    Loading,

    /// Ready, with no work in flight.
    Idle,

    /// A test has been dispatched to the page.
    Running,

    /// An in-place code upgrade is being applied.
    HotReload,

    /// The page loaded at the transport level but the code threw before
    /// announcing readiness. Terminal until a new code version arrives.
    BadCode,

    /// New work interrupted in-flight work; the in-flight operation gets a
    /// short grace period to finish before a forced reload.
    Abort,
}

/// An event consumed by the state machine.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// The page announced readiness.
    Ready,

    /// The page announced an applied in-place code upgrade.
    HotReloadApplied,

    /// The page produced a test result.
    ResultsReady(PageResult),

    /// The page threw an uncaught exception.
    ExceptionThrown {
        /// The classified exception message.
        message: String,

        /// The rendered stack, one frame per line.
        stack: String,
    },

    /// The current state's timeout fired.
    Timeout,
}

impl From<ConsoleSignal> for SessionEvent {
    fn from(signal: ConsoleSignal) -> Self {
        match signal {
            ConsoleSignal::Idle => Self::Ready,
            ConsoleSignal::HotReloadApplied => Self::HotReloadApplied,
            ConsoleSignal::Results(result) => Self::ResultsReady(result),
        }
    }
}

/// A side effect requested by a transition.
///
/// Failing a unit and forcing a reload are deliberately separate: the former
/// resolves a waiter inside the machine, the latter is returned here for the
/// driver to execute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEffect {
    /// Fully reload the tab.
    Reload,

    /// Evaluate an expression in the page, discarding its value.
    Evaluate(String),

    /// Evaluate the test-name listing entry point and feed the outcome back
    /// through [`TabSession::resolve_test_names`].
    EvaluateTestNames,

    /// Arm the session's single timeout.
    ArmTimeout(Duration),

    /// Disarm the session's timeout.
    ClearTimeout,
}

/// The resolution of a [`TabSession::set_code_version`] future.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodeUpdateOutcome {
    /// The code version was applied, by in-place upgrade or full reload.
    Applied,

    /// A newer code version replaced this one before it was applied.
    Superseded,
}

/// Resolves with the test's result, or `None` if the dispatch was superseded
/// before it could produce one.
pub type ResultWaiter = oneshot::Sender<Option<TestResult>>;

/// Resolves when a code version is applied or superseded.
pub type CodeWaiter = oneshot::Sender<CodeUpdateOutcome>;

/// Resolves with the page's test names.
pub type ListWaiter = oneshot::Sender<Result<Vec<String>, ListTestsError>>;

#[derive(Debug)]
struct PendingTest {
    spec: TestSpec,
    waiter: ResultWaiter,
    // Set when the test is dispatched to the page.
    stopwatch: Option<StopwatchStart>,
}

#[derive(Debug)]
struct PendingCode {
    version: String,
    waiter: CodeWaiter,
}

#[derive(Clone, Debug)]
struct BadCode {
    error: String,
    stack: String,
}

/// The state machine for one browser-tab session.
#[derive(Debug)]
pub struct TabSession {
    id: String,
    config: TabConfig,
    timeouts: SessionTimeouts,
    state: TabState,
    pending_test: Option<PendingTest>,
    pending_code: Option<PendingCode>,
    // The waiter for an upgrade currently being applied in the page.
    in_flight_code: Option<CodeWaiter>,
    list_waiter: Option<ListWaiter>,
    bad_code: Option<BadCode>,
}

impl TabSession {
    /// Creates a session in the `Loading` state.
    ///
    /// The driver is expected to navigate the tab before applying the
    /// returned effects.
    pub fn new(id: impl Into<String>, config: TabConfig, timeouts: SessionTimeouts) -> (Self, Vec<SessionEffect>) {
        let session = Self {
            id: id.into(),
            config,
            timeouts,
            state: TabState::Loading,
            pending_test: None,
            pending_code: None,
            in_flight_code: None,
            list_waiter: None,
            bad_code: None,
        };
        let effects = vec![SessionEffect::ArmTimeout(timeouts.load)];
        (session, effects)
    }

    /// The session's identifier, used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current state.
    pub fn state(&self) -> TabState {
        self.state
    }

    /// Assigns a test to this session.
    ///
    /// Any previously assigned test is superseded: its waiter resolves with
    /// `None` (aborted, not a failure) and it will not be retried. The new
    /// test runs as soon as the session is idle.
    pub fn set_test(&mut self, spec: TestSpec, waiter: ResultWaiter) -> Vec<SessionEffect> {
        if let Some(previous) = self.pending_test.take() {
            debug!(session = %self.id, superseded = %previous.spec.test_name, "superseding pending test");
            let _ = previous.waiter.send(None);
        }
        self.pending_test = Some(PendingTest {
            spec,
            waiter,
            stopwatch: None,
        });

        match self.state {
            TabState::Idle => self.start_running(),
            TabState::Running => self.begin_abort(),
            TabState::BadCode => {
                let bad_code = self.bad_code.clone().expect("bad code state records its error");
                self.fail_pending_test(bad_code.error, bad_code.stack);
                Vec::new()
            }
            TabState::Loading | TabState::HotReload | TabState::Abort => Vec::new(),
        }
    }

    /// Assigns a new code version to this session.
    ///
    /// Any previously pending, not-yet-applied version is superseded. The new
    /// version is applied in place when the session next becomes idle, or by
    /// a full reload if the session is in `BadCode` (an in-place upgrade
    /// cannot recover from bad code) or configured to skip hot reload.
    pub fn set_code_version(&mut self, version: impl Into<String>, waiter: CodeWaiter) -> Vec<SessionEffect> {
        if let Some(previous) = self.pending_code.take() {
            let _ = previous.waiter.send(CodeUpdateOutcome::Superseded);
        }
        self.pending_code = Some(PendingCode {
            version: version.into(),
            waiter,
        });

        match self.state {
            TabState::Idle => self.start_hot_reload(),
            TabState::BadCode => self.full_reload(),
            TabState::Loading | TabState::Running | TabState::HotReload | TabState::Abort => {
                Vec::new()
            }
        }
    }

    /// Requests the page's test names.
    ///
    /// Resolved the next time the session is idle; rejected immediately on
    /// bad code.
    pub fn request_test_names(&mut self, waiter: ListWaiter) -> Vec<SessionEffect> {
        if let Some(previous) = self.list_waiter.replace(waiter) {
            let _ = previous.send(Err(ListTestsError::Superseded));
        }

        match self.state {
            TabState::Idle => vec![SessionEffect::EvaluateTestNames],
            TabState::BadCode => {
                let message = self
                    .bad_code
                    .as_ref()
                    .expect("bad code state records its error")
                    .error
                    .clone();
                self.reject_list_request(ListTestsError::BadCode { message });
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Feeds the outcome of evaluating the test-name listing entry point back
    /// into the machine.
    pub fn resolve_test_names(&mut self, outcome: Result<EvalOutcome, ChannelError>) {
        let Some(waiter) = self.list_waiter.take() else {
            return;
        };
        let resolution = match outcome {
            Ok(EvalOutcome {
                exception: Some(details),
                ..
            }) => Err(ListTestsError::Evaluate {
                message: details.message(),
            }),
            Ok(EvalOutcome { value, .. }) => {
                let names = value
                    .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
                    .unwrap_or_default();
                Ok(names)
            }
            Err(error) => Err(ListTestsError::Evaluate {
                message: error.to_string(),
            }),
        };
        let _ = waiter.send(resolution);
    }

    /// Forces a full reload regardless of state.
    pub fn force_reload(&mut self) -> Vec<SessionEffect> {
        self.full_reload()
    }

    /// Consumes one event and returns the effects to execute.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        match (self.state, event) {
            // Loading.
            (TabState::Loading, SessionEvent::Ready) => self.become_idle(),
            (TabState::Loading, SessionEvent::ExceptionThrown { message, stack }) => {
                self.enter_bad_code(message, stack)
            }
            (TabState::Loading, SessionEvent::Timeout) => {
                warn!(session = %self.id, "timeout while loading");
                self.full_reload()
            }

            // Running.
            (TabState::Running, SessionEvent::ResultsReady(result)) => {
                let expected = self
                    .pending_test
                    .as_ref()
                    .map(|t| t.spec.test_name.clone());
                if expected.as_deref() == Some(result.full_name.as_str()) {
                    self.finish_test(result);
                    self.become_idle()
                } else {
                    warn!(
                        session = %self.id,
                        got = %result.full_name,
                        expected = expected.as_deref().unwrap_or("<none>"),
                        "result for a test this session did not dispatch, ignoring"
                    );
                    Vec::new()
                }
            }
            (TabState::Running, SessionEvent::Timeout) => {
                self.fail_pending_test(TEST_TIMEOUT_ERROR.to_owned(), String::new());
                self.full_reload()
            }
            (TabState::Running, SessionEvent::ExceptionThrown { message, stack }) => {
                if self.config.fail_on_exceptions {
                    self.fail_pending_test(message, stack);
                    self.full_reload()
                } else {
                    // Some suites throw stray errors that never fail the test
                    // promise. Leave the result waiter pending; the test's own
                    // completion signal or the run timeout resolves it.
                    debug!(session = %self.id, %message, "ignoring exception while running");
                    Vec::new()
                }
            }

            // Hot reload.
            (TabState::HotReload, SessionEvent::HotReloadApplied) => {
                if let Some(waiter) = self.in_flight_code.take() {
                    let _ = waiter.send(CodeUpdateOutcome::Applied);
                }
                self.become_idle()
            }
            (TabState::HotReload, SessionEvent::Timeout) => {
                warn!(session = %self.id, "timeout while hot reloading");
                self.full_reload()
            }
            (TabState::HotReload, SessionEvent::ExceptionThrown { message, .. }) => {
                // An in-place upgrade that threw can't be trusted to have left
                // a consistent state.
                warn!(session = %self.id, %message, "exception while hot reloading");
                self.full_reload()
            }

            // Abort.
            (TabState::Abort, SessionEvent::ResultsReady(_) | SessionEvent::Ready) => {
                self.become_idle()
            }
            (TabState::Abort, SessionEvent::Timeout) => self.full_reload(),
            (TabState::Abort, SessionEvent::ExceptionThrown { .. }) => self.full_reload(),

            // Everything else is logged and ignored. In particular BadCode
            // only exits through a new code-version assignment.
            (state, event) => {
                debug!(session = %self.id, ?state, ?event, "ignoring event");
                Vec::new()
            }
        }
    }

    /// Fails the in-flight test with a transport error (if one was in flight)
    /// and reloads.
    pub fn on_transport_error(&mut self, error: &ChannelError) -> Vec<SessionEffect> {
        if self.state == TabState::Running {
            self.fail_pending_test(error.to_string(), String::new());
        }
        self.full_reload()
    }

    /// Resolves every outstanding waiter before the session shuts down.
    pub fn shut_down(&mut self, error: &ChannelError) {
        if let Some(test) = self.pending_test.take() {
            let mut result = synthesized_result(&test.spec, error.to_string(), String::new());
            result.time = elapsed_ms(&test.stopwatch);
            let _ = test.waiter.send(Some(result));
        }
        if let Some(code) = self.pending_code.take() {
            let _ = code.waiter.send(CodeUpdateOutcome::Superseded);
        }
        if let Some(waiter) = self.in_flight_code.take() {
            let _ = waiter.send(CodeUpdateOutcome::Superseded);
        }
        self.reject_list_request(ListTestsError::SessionClosed);
    }

    fn become_idle(&mut self) -> Vec<SessionEffect> {
        self.state = TabState::Idle;
        self.bad_code = None;
        if self.pending_code.is_some() {
            return self.start_hot_reload();
        }
        if self.pending_test.is_some() {
            return self.start_running();
        }
        let mut effects = vec![SessionEffect::ClearTimeout];
        if self.list_waiter.is_some() {
            effects.push(SessionEffect::EvaluateTestNames);
        }
        effects
    }

    fn start_running(&mut self) -> Vec<SessionEffect> {
        let test = self
            .pending_test
            .as_mut()
            .expect("start_running requires a pending test");
        self.state = TabState::Running;
        test.stopwatch = Some(crate::time::stopwatch());
        vec![
            SessionEffect::Evaluate(channel::run_expression(
                &test.spec.test_name,
                test.spec.run_id,
            )),
            SessionEffect::ArmTimeout(self.timeouts.run),
        ]
    }

    fn start_hot_reload(&mut self) -> Vec<SessionEffect> {
        if self.config.skip_hot_reload {
            return self.full_reload();
        }
        let code = self
            .pending_code
            .take()
            .expect("start_hot_reload requires a pending code version");
        if let Some(superseded) = self.in_flight_code.take() {
            let _ = superseded.send(CodeUpdateOutcome::Superseded);
        }
        self.state = TabState::HotReload;
        self.in_flight_code = Some(code.waiter);
        vec![
            SessionEffect::Evaluate(channel::upgrade_expression(&code.version)),
            SessionEffect::ArmTimeout(self.timeouts.hot_reload),
        ]
    }

    fn begin_abort(&mut self) -> Vec<SessionEffect> {
        self.state = TabState::Abort;
        vec![SessionEffect::ArmTimeout(self.timeouts.abort)]
    }

    fn full_reload(&mut self) -> Vec<SessionEffect> {
        self.state = TabState::Loading;
        self.bad_code = None;
        // A full reload loads the latest code, so any code-version work in
        // flight or pending is applied by it.
        if let Some(code) = self.pending_code.take() {
            let _ = code.waiter.send(CodeUpdateOutcome::Applied);
        }
        if let Some(waiter) = self.in_flight_code.take() {
            let _ = waiter.send(CodeUpdateOutcome::Applied);
        }
        vec![
            SessionEffect::Reload,
            SessionEffect::ArmTimeout(self.timeouts.load),
        ]
    }

    fn enter_bad_code(&mut self, error: String, stack: String) -> Vec<SessionEffect> {
        warn!(session = %self.id, %error, "code failed while loading");
        self.state = TabState::BadCode;
        self.bad_code = Some(BadCode {
            error: error.clone(),
            stack: stack.clone(),
        });
        if self.pending_test.is_some() {
            self.fail_pending_test(error.clone(), stack);
        }
        self.reject_list_request(ListTestsError::BadCode { message: error });
        vec![SessionEffect::ClearTimeout]
    }

    /// Resolves the pending test's waiter with a synthesized failure.
    fn fail_pending_test(&mut self, error: String, stack: String) {
        let Some(test) = self.pending_test.take() else {
            return;
        };
        let mut result = synthesized_result(&test.spec, error, stack);
        result.time = elapsed_ms(&test.stopwatch);
        let _ = test.waiter.send(Some(result));
    }

    /// Resolves the pending test's waiter with the page's result.
    fn finish_test(&mut self, page_result: PageResult) {
        let Some(test) = self.pending_test.take() else {
            return;
        };
        let (error, stack) = match page_result.error {
            Some(error) => (Some(error.message), error.stack),
            None => (None, None),
        };
        let result = TestResult {
            full_name: test.spec.test_name,
            error,
            stack,
            time: elapsed_ms(&test.stopwatch),
            attempts: 1,
            run_id: test.spec.run_id,
            batch_id: None,
            log_stream: None,
        };
        let _ = test.waiter.send(Some(result));
    }

    fn reject_list_request(&mut self, error: ListTestsError) {
        if let Some(waiter) = self.list_waiter.take() {
            let _ = waiter.send(Err(error));
        }
    }
}

fn synthesized_result(spec: &TestSpec, error: String, stack: String) -> TestResult {
    TestResult {
        full_name: spec.test_name.clone(),
        error: Some(error),
        stack: (!stack.is_empty()).then_some(stack),
        time: 0,
        attempts: 1,
        run_id: spec.run_id,
        batch_id: None,
        log_stream: None,
    }
}

fn elapsed_ms(stopwatch: &Option<StopwatchStart>) -> u64 {
    stopwatch
        .as_ref()
        .map(|s| s.snapshot().active.as_millis() as u64)
        .unwrap_or(0)
}
