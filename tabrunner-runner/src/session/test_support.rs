// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted in-memory execution target for session tests.

use super::channel::{
    EvalOutcome, PageChannel, PageEvent, SIGNAL_HOT_RELOAD, SIGNAL_IDLE, SIGNAL_RESULTS,
    TEST_NAMES_EXPRESSION,
};
use crate::errors::ChannelError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;

/// A fake page that responds to the in-page entry points the way the real
/// agent does: `run` emits a results console message, `upgrade` emits a
/// hot-reload message, and navigation/reload emit an idle message.
pub(crate) struct FakePageChannel {
    tx: mpsc::UnboundedSender<PageEvent>,
    rx: mpsc::UnboundedReceiver<PageEvent>,
    /// Tests that fail their first N dispatches (u32::MAX = always).
    failing: HashMap<String, u32>,
    /// Tests that never produce a result.
    hanging: HashSet<String>,
    /// Dispatch counts per test name.
    dispatches: HashMap<String, u32>,
    test_names: Vec<String>,
    navigation_error: Option<String>,
    reloads: Arc<AtomicUsize>,
}

impl FakePageChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            failing: HashMap::new(),
            hanging: HashSet::new(),
            dispatches: HashMap::new(),
            test_names: Vec::new(),
            navigation_error: None,
            reloads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the named test fail its first `attempts` dispatches.
    pub(crate) fn fail_first_attempts(&mut self, name: &str, attempts: u32) {
        self.failing.insert(name.to_owned(), attempts);
    }

    /// Makes the named test never produce a result.
    pub(crate) fn hang(&mut self, name: &str) {
        self.hanging.insert(name.to_owned());
    }

    /// Sets the names returned by the listing entry point.
    pub(crate) fn set_test_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_names = names.into_iter().map(Into::into).collect();
    }

    /// Makes the initial navigation fail.
    pub(crate) fn fail_navigation(&mut self, message: &str) {
        self.navigation_error = Some(message.to_owned());
    }

    /// A sender for injecting arbitrary page events.
    #[allow(dead_code)]
    pub(crate) fn event_sender(&self) -> mpsc::UnboundedSender<PageEvent> {
        self.tx.clone()
    }

    /// Shared counter of reloads performed against this page.
    pub(crate) fn reload_count(&self) -> Arc<AtomicUsize> {
        self.reloads.clone()
    }

    fn emit(&self, text: String) {
        let _ = self.tx.send(PageEvent::Console(text));
    }

    fn dispatch_test(&mut self, expression: &str) {
        let payload = expression
            .strip_prefix("TabRunner.run(")
            .and_then(|rest| rest.strip_suffix(')'))
            .expect("run expression shape");
        let args: Value = serde_json::from_str(payload).expect("run arguments are JSON");
        let name = args["testName"].as_str().expect("testName is a string").to_owned();

        if self.hanging.contains(&name) {
            return;
        }

        let dispatch = self.dispatches.entry(name.clone()).or_insert(0);
        *dispatch += 1;
        let fails = self.failing.get(&name).copied().unwrap_or(0);
        let result = if *dispatch <= fails {
            serde_json::json!({
                "fullName": name,
                "error": { "message": "simulated failure", "stack": "at fake.js:1" },
            })
        } else {
            serde_json::json!({ "fullName": name })
        };
        self.emit(format!("{SIGNAL_RESULTS} {result}"));
    }
}

impl PageChannel for FakePageChannel {
    fn navigate(&mut self, _url: &str) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if let Some(message) = &self.navigation_error {
                return Err(ChannelError::new(message.clone()));
            }
            self.emit(SIGNAL_IDLE.to_owned());
            Ok(())
        })
    }

    fn reload(&mut self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            self.emit(SIGNAL_IDLE.to_owned());
            Ok(())
        })
    }

    fn evaluate(&mut self, expression: &str) -> BoxFuture<'_, Result<EvalOutcome, ChannelError>> {
        let expression = expression.to_owned();
        Box::pin(async move {
            if expression == TEST_NAMES_EXPRESSION {
                return Ok(EvalOutcome {
                    value: Some(Value::from(self.test_names.clone())),
                    exception: None,
                });
            }
            if expression.starts_with("TabRunner.run(") {
                self.dispatch_test(&expression);
            } else if expression.starts_with("TabRunner.upgrade(") {
                self.emit(SIGNAL_HOT_RELOAD.to_owned());
            }
            Ok(EvalOutcome::default())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Option<PageEvent>> {
        Box::pin(self.rx.recv())
    }
}
