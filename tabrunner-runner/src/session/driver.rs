// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The async driver that owns a session's channel.
//!
//! The [`TabSession`](super::TabSession) machine is synchronous; this module
//! wraps it in a task that executes its effects against the real
//! [`PageChannel`], converts inbound channel events into [`SessionEvent`]s,
//! and arms the single per-session timeout. Commands arrive over an mpsc
//! channel from [`SessionHandle`] clones, so within one session work is
//! strictly sequential.

use super::{
    CodeUpdateOutcome, CodeWaiter, ListWaiter, ResultWaiter, SessionEffect, SessionEvent,
    TabSession, TestSpec,
    channel::{PageChannel, PageEvent, TEST_NAMES_EXPRESSION, parse_console_signal},
};
use crate::{
    config::{SessionTimeouts, TabConfig},
    errors::{ChannelError, ListTestsError, SessionError},
};
use std::time::Duration;
use tabrunner_metadata::TestResult;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

#[derive(Debug)]
enum SessionCommand {
    SetTest(TestSpec, ResultWaiter),
    SetCodeVersion(String, CodeWaiter),
    ListTests(ListWaiter),
    Reload,
}

/// A cloneable handle to a driven session.
///
/// Dropping every handle shuts the driver down.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Assigns a test and waits for its result.
    ///
    /// Returns `None` if the dispatch was superseded before producing a
    /// result, or if the session shut down before accepting it.
    pub async fn set_test(&self, spec: TestSpec) -> Option<TestResult> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::SetTest(spec, tx))
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Assigns a code version and waits for it to be applied or superseded.
    pub async fn set_code_version(&self, version: impl Into<String>) -> CodeUpdateOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::SetCodeVersion(version.into(), tx))
            .is_err()
        {
            return CodeUpdateOutcome::Superseded;
        }
        rx.await.unwrap_or(CodeUpdateOutcome::Superseded)
    }

    /// Lists the test names the page defines.
    pub async fn test_names(&self) -> Result<Vec<String>, ListTestsError> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCommand::ListTests(tx)).is_err() {
            return Err(ListTestsError::SessionClosed);
        }
        rx.await.unwrap_or(Err(ListTestsError::SessionClosed))
    }

    /// Requests a full reload, without waiting for it.
    pub fn reload(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Reload);
    }
}

/// Spawns a session driver on the current runtime.
///
/// The driver navigates the tab to `url`, then serves commands until every
/// [`SessionHandle`] is dropped. A navigation failure is an acquisition
/// failure: it surfaces through the returned join handle, and every command
/// sent to the session resolves as closed.
pub fn spawn_session(
    id: impl Into<String>,
    config: TabConfig,
    timeouts: SessionTimeouts,
    url: String,
    channel: Box<dyn PageChannel>,
) -> (SessionHandle, JoinHandle<Result<(), SessionError>>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (session, effects) = TabSession::new(id, config, timeouts);
    let join = tokio::spawn(drive(session, effects, channel, cmd_rx, url));
    (SessionHandle { cmd_tx }, join)
}

// When no timeout is armed the timer still needs a deadline to sleep on; any
// comfortably large value works since the branch is disabled.
const IDLE_TICK: Duration = Duration::from_secs(3600);

async fn drive(
    mut session: TabSession,
    mut effects: Vec<SessionEffect>,
    mut channel: Box<dyn PageChannel>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    url: String,
) -> Result<(), SessionError> {
    if let Err(error) = channel.navigate(&url).await {
        session.shut_down(&error);
        cmd_rx.close();
        drain_commands(&mut cmd_rx);
        return Err(SessionError::Navigate(error));
    }

    let mut deadline: Option<Instant> = None;

    loop {
        // Apply queued effects before waiting for the next stimulus. A
        // transport error replaces the remaining batch with the recovery
        // transition's effects.
        'apply: loop {
            let batch = std::mem::take(&mut effects);
            if batch.is_empty() {
                break;
            }
            for effect in batch {
                match effect {
                    SessionEffect::Reload => {
                        if let Err(error) = channel.reload().await {
                            // Reloading is the recovery path; if it fails the
                            // session is gone.
                            warn!(session = session.id(), %error, "reload failed");
                            session.shut_down(&error);
                            cmd_rx.close();
                            drain_commands(&mut cmd_rx);
                            return Err(SessionError::ConnectionLost(error));
                        }
                    }
                    SessionEffect::Evaluate(expression) => {
                        if let Err(error) = channel.evaluate(&expression).await {
                            warn!(session = session.id(), %error, "evaluate failed");
                            effects = session.on_transport_error(&error);
                            continue 'apply;
                        }
                    }
                    SessionEffect::EvaluateTestNames => {
                        let outcome = channel.evaluate(TEST_NAMES_EXPRESSION).await;
                        session.resolve_test_names(outcome);
                    }
                    SessionEffect::ArmTimeout(duration) => {
                        deadline = Some(Instant::now() + duration);
                    }
                    SessionEffect::ClearTimeout => {
                        deadline = None;
                    }
                }
            }
        }

        let timeout_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_TICK);

        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(SessionCommand::SetTest(spec, waiter)) => {
                    effects = session.set_test(spec, waiter);
                }
                Some(SessionCommand::SetCodeVersion(version, waiter)) => {
                    effects = session.set_code_version(version, waiter);
                }
                Some(SessionCommand::ListTests(waiter)) => {
                    effects = session.request_test_names(waiter);
                }
                Some(SessionCommand::Reload) => {
                    effects = session.force_reload();
                }
                None => {
                    // Every handle is gone; nothing can observe this session
                    // anymore.
                    debug!(session = session.id(), "all handles dropped, shutting down");
                    return Ok(());
                }
            },
            event = channel.next_event() => match event {
                Some(PageEvent::Console(text)) => {
                    match parse_console_signal(&text) {
                        Some(signal) => effects = session.handle_event(signal.into()),
                        None => debug!(session = session.id(), %text, "page console"),
                    }
                }
                Some(PageEvent::Exception(details)) => {
                    effects = session.handle_event(SessionEvent::ExceptionThrown {
                        message: details.message(),
                        stack: details.stack_string(),
                    });
                }
                None => {
                    let error = ChannelError::new("page event stream closed");
                    session.shut_down(&error);
                    cmd_rx.close();
                    drain_commands(&mut cmd_rx);
                    return Err(SessionError::EventStreamClosed);
                }
            },
            _ = tokio::time::sleep_until(timeout_at), if deadline.is_some() => {
                deadline = None;
                effects = session.handle_event(SessionEvent::Timeout);
            }
        }
    }
}

/// Resolves commands that were queued behind a fatal error.
fn drain_commands(cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    while let Ok(command) = cmd_rx.try_recv() {
        match command {
            SessionCommand::SetTest(_, waiter) => {
                let _ = waiter.send(None);
            }
            SessionCommand::SetCodeVersion(_, waiter) => {
                let _ = waiter.send(CodeUpdateOutcome::Superseded);
            }
            SessionCommand::ListTests(waiter) => {
                let _ = waiter.send(Err(ListTestsError::SessionClosed));
            }
            SessionCommand::Reload => {}
        }
    }
}
