//! Error types for the listener lifecycle and platform hooks.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`FocusListener::start`](crate::FocusListener::start).
#[derive(Error, Debug)]
pub enum StartError {
    /// The handle is not in the `Idle` state. Call `stop` first.
    #[error("Listener already started")]
    AlreadyStarted,

    /// The OS focus-notification facility could not be reached.
    ///
    /// The handle moves to the `Failed` state; create a new handle to retry.
    #[error("Platform focus notifications unavailable: {0}")]
    PlatformUnavailable(#[from] HookError),
}

/// Errors returned by [`FocusListener::stop`](crate::FocusListener::stop).
#[derive(Error, Debug)]
pub enum StopError {
    /// Another `start` or `stop` is in flight on this handle.
    #[error("Another lifecycle operation is in progress")]
    ConcurrentLifecycleOperation,

    /// The background context did not confirm shutdown within the bound.
    ///
    /// The context has been forcibly abandoned; its OS resources may leak.
    #[error("Background context did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Errors that can occur in a platform hook.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("Socket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Socket path not found: {0}")]
    SocketNotFound(String),

    #[error("Control socket query failed: {0}")]
    ControlQueryFailed(String),

    #[error("X11 connection failed: {0}")]
    X11ConnectionFailed(String),

    #[error("X11 request failed: {0}")]
    X11RequestFailed(String),

    #[error("Subscription timed out after {0:?}")]
    SubscribeTimeout(Duration),

    #[error("No supported focus-notification source detected: {0}")]
    Unsupported(String),
}
