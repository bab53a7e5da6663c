// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [`RemoteInvoker`] that shells out to a worker command.
//!
//! Each invocation spawns the configured command with the function name as
//! its final argument, writes the request JSON to its stdin, and reads the
//! response JSON from its stdout. This keeps the actual worker transport (a
//! cloud function CLI, an SSH wrapper, a local simulator) outside the core
//! while preserving the invocation contract: an `errorMessage` envelope or a
//! non-zero exit is an invocation failure, and throttling messages are
//! surfaced as the retryable error class.

use futures::future::BoxFuture;
use serde_json::Value;
use std::{process::Stdio, sync::Arc};
use tabrunner_metadata::{ListRequest, WorkRequest, WorkResponse};
use tabrunner_runner::{errors::InvokeError, runner::RemoteInvoker};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

/// An error constructing a [`ProcessInvoker`].
#[derive(Debug, Error)]
pub enum InvokerSetupError {
    /// The worker command line could not be split into words.
    #[error("failed to parse worker command `{command}`")]
    Parse {
        /// The offending command line.
        command: String,
        /// The underlying parse error.
        #[source]
        error: shell_words::ParseError,
    },

    /// The worker command line was empty.
    #[error("worker command is empty")]
    Empty,
}

/// Invokes worker functions by spawning a subprocess per call.
#[derive(Clone, Debug)]
pub struct ProcessInvoker {
    program: String,
    args: Vec<String>,
}

impl ProcessInvoker {
    /// Parses a shell-style command line into an invoker.
    pub fn new(command_line: &str) -> Result<Self, InvokerSetupError> {
        let mut words =
            shell_words::split(command_line).map_err(|error| InvokerSetupError::Parse {
                command: command_line.to_owned(),
                error,
            })?;
        if words.is_empty() {
            return Err(InvokerSetupError::Empty);
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    async fn invoke(&self, function: &str, payload: Value) -> Result<Value, InvokeError> {
        debug!(function, program = %self.program, "invoking worker command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(function)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| InvokeError::Invocation {
                message: format!("failed to spawn `{}`: {error}", self.program),
            })?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let body = payload.to_string();
        stdin
            .write_all(body.as_bytes())
            .await
            .map_err(|error| InvokeError::Invocation {
                message: format!("failed to write request: {error}"),
            })?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| InvokeError::Invocation {
                message: format!("failed to wait for worker: {error}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InvokeError::from_message(format!(
                "worker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let payload: Value = serde_json::from_slice(&output.stdout)
            .map_err(|error| InvokeError::Response(Arc::new(error)))?;

        // Failed invocations can come back as a 200-shaped error envelope.
        if let Some(message) = payload.get("errorMessage").and_then(Value::as_str) {
            return Err(InvokeError::from_message(message.to_owned()));
        }

        Ok(payload)
    }
}

impl RemoteInvoker for ProcessInvoker {
    fn work_tests(&self, request: WorkRequest) -> BoxFuture<'_, Result<WorkResponse, InvokeError>> {
        Box::pin(async move {
            let payload = serde_json::to_value(&request)
                .map_err(|error| InvokeError::Response(Arc::new(error)))?;
            let response = self.invoke("workTests", payload).await?;
            serde_json::from_value(response).map_err(|error| InvokeError::Response(Arc::new(error)))
        })
    }

    fn list_tests(
        &self,
        request: ListRequest,
    ) -> BoxFuture<'_, Result<Vec<String>, InvokeError>> {
        Box::pin(async move {
            let payload = serde_json::to_value(&request)
                .map_err(|error| InvokeError::Response(Arc::new(error)))?;
            let response = self.invoke("listTests", payload).await?;
            serde_json::from_value(response).map_err(|error| InvokeError::Response(Arc::new(error)))
        })
    }
}
