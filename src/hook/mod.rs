//! Platform focus-notification hooks.
//!
//! This module provides a generic abstraction for subscribing to foreground
//! window changes across different window managers and desktop environments.

mod hyprland;
mod x11;

use crate::error::HookError;
use crate::event::RawNotification;
use async_trait::async_trait;
pub use hyprland::HyprlandHook;
use std::env;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
pub use x11::X11Hook;

/// Handler invoked with every raw notification, on the hook's background
/// context. Must not block; implementations hand the payload to a channel.
pub type RawHandler = Box<dyn FnMut(RawNotification) + Send>;

/// Trait for OS focus-change notification sources.
#[async_trait]
pub trait PlatformHook: Send {
    /// Register with the OS and start delivering raw notifications.
    ///
    /// Spawns exactly one background driver whose sole job is running the
    /// notification loop until the returned [`Subscription`] is released.
    /// Returns only after the OS registration is confirmed.
    async fn subscribe(&mut self, handler: RawHandler) -> Result<Subscription, HookError>;
}

/// Ownership of one active OS registration.
///
/// Exclusive to a single listener handle. [`release`](Subscription::release)
/// is idempotent; dropping an unreleased subscription cancels and aborts the
/// driver without waiting.
pub struct Subscription {
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a driver task and its cancellation token.
    #[must_use]
    pub fn new(cancel: CancellationToken, driver: JoinHandle<()>) -> Self {
        Self {
            cancel,
            driver: Some(driver),
        }
    }

    /// Deregister and wait for the driver to exit.
    ///
    /// Cooperative: signals cancellation, then joins the driver within
    /// `timeout`. On timeout the driver is aborted and abandoned; the OS
    /// resource may leak, which is reported as an error. For drivers running
    /// on a blocking thread (`spawn_blocking`), the abort is advisory only:
    /// the thread keeps running until it next observes the cancellation
    /// token.
    pub async fn release(&mut self, timeout: Duration) -> Result<(), Duration> {
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        self.cancel.cancel();

        match tokio::time::timeout(timeout, &mut driver).await {
            Ok(Ok(())) => {
                debug!("Hook driver exited cleanly");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Hook driver terminated abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                error!(
                    "Hook driver did not release its OS registration within {:?}, abandoning it",
                    timeout
                );
                driver.abort();
                Err(timeout)
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.cancel.cancel();
            driver.abort();
        }
    }
}

/// Detect a usable focus-notification source for the current session.
///
/// Preference order: Hyprland IPC, then X11. Fails with
/// [`HookError::Unsupported`] when neither is present.
pub fn detect() -> Result<Box<dyn PlatformHook>, HookError> {
    if env::var("HYPRLAND_INSTANCE_SIGNATURE").is_ok() {
        debug!("Detected Hyprland session");
        return Ok(Box::new(HyprlandHook::new()));
    }

    if env::var("DISPLAY").is_ok() {
        debug!("Detected X11 session");
        return Ok(Box::new(X11Hook::new()));
    }

    Err(HookError::Unsupported(
        "neither HYPRLAND_INSTANCE_SIGNATURE nor DISPLAY is set".to_string(),
    ))
}
