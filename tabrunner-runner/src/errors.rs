// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by tabrunner.

use camino::Utf8PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// An error produced by the opaque browser-control channel.
///
/// The transport behind a channel (a devtools connection, usually) is outside
/// the core, so this carries a message and an optional source rather than a
/// structured taxonomy.
#[derive(Clone, Debug, Error)]
#[error("browser channel error: {message}")]
pub struct ChannelError {
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ChannelError {
    /// Creates a new channel error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new channel error wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }
}

/// An error that terminated a session.
///
/// Only [`SessionError::Navigate`] is an acquisition failure; it propagates to
/// the run coordinator and is reported as a whole-group failure. Everything
/// else is recovered locally by reloading.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The initial navigation failed, so the session never became usable.
    #[error("failed to navigate session to its start url")]
    Navigate(#[source] ChannelError),

    /// The channel died and a recovery reload also failed.
    #[error("browser connection lost")]
    ConnectionLost(#[source] ChannelError),

    /// The channel's event stream ended.
    #[error("browser event stream closed")]
    EventStreamClosed,
}

/// An error resolving a test-name listing request against a session.
#[derive(Clone, Debug, Error)]
pub enum ListTestsError {
    /// The page code threw before announcing readiness.
    #[error("code failed to load: {message}")]
    BadCode {
        /// The captured page error.
        message: String,
    },

    /// Evaluating the listing entry point reported an exception.
    #[error("listing test names threw: {message}")]
    Evaluate {
        /// The exception message.
        message: String,
    },

    /// A newer listing request replaced this one before it started.
    #[error("listing request superseded")]
    Superseded,

    /// The session shut down before the request could be resolved.
    #[error("session closed")]
    SessionClosed,
}

/// An error invoking a remote worker function.
#[derive(Clone, Debug, Error)]
pub enum InvokeError {
    /// The invocation was throttled. This is the only retryable class.
    #[error("remote invocation rate exceeded: {message}")]
    RateExceeded {
        /// The provider's throttling message.
        message: String,
    },

    /// The invocation itself failed (not an individual test).
    #[error("remote invocation failed: {message}")]
    Invocation {
        /// The failure message.
        message: String,
    },

    /// The worker responded with a payload that could not be decoded.
    #[error("invalid worker response")]
    Response(#[source] Arc<serde_json::Error>),
}

impl InvokeError {
    /// Classifies a provider error message, mapping throttling responses to
    /// [`InvokeError::RateExceeded`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Rate Exceeded") {
            Self::RateExceeded { message }
        } else {
            Self::Invocation { message }
        }
    }

    /// Returns true if the invocation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateExceeded { .. })
    }
}

/// An error starting a run.
///
/// These are the only errors the public run contract surfaces; everything else
/// is recovered locally and reported through the result stream.
#[derive(Debug, Error)]
pub enum StartRunError {
    /// A local run was requested but the coordinator has no sessions.
    #[error("local run requested but no sessions are attached")]
    NoSessions,

    /// A remote run was requested but the coordinator has no invoker.
    #[error("remote run requested but no invoker is attached")]
    NoInvoker,
}

/// An error loading the runtime-history cache.
#[derive(Debug, Error)]
pub enum HistoryLoadError {
    /// Error reading the history file.
    #[error("failed to read runtime history at {path}")]
    Read {
        /// The path that failed to be read.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error deserializing the history file.
    #[error("failed to deserialize runtime history at {path}")]
    Deserialize {
        /// The path that failed to be deserialized.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error flushing the runtime-history cache to disk.
#[derive(Debug, Error)]
pub enum HistoryFlushError {
    /// Error creating the store directory.
    #[error("failed to create store directory {path}")]
    CreateDir {
        /// The directory that failed to be created.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error serializing the history map.
    #[error("failed to serialize runtime history")]
    Serialize(#[source] serde_json::Error),

    /// Error writing the history file.
    #[error("failed to write runtime history to {path}")]
    Write {
        /// The path that failed to be written.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },
}
