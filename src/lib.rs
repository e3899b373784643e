//! focus-listener - Foreground window focus-change listener.
//!
//! Monitors the host session for foreground-window changes and delivers the
//! newly focused window's title to a consumer callback, optionally filtered
//! to windows owned by a single process. Hyprland and X11 sessions are
//! supported, detected at start time.
//!
//! Deliveries are serialized, ordered as the OS produced them, and never
//! happen after [`FocusListener::stop`] has returned.
//!
//! ```no_run
//! use focus_listener::FocusListener;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = FocusListener::new();
//! listener
//!     .start(None, Box::new(|title| println!("focused: {title}")))
//!     .await?;
//! // ... consumer keeps running, callback fires on every focus change ...
//! listener.stop().await?;
//! # Ok(())
//! # }
//! ```

mod delivery;
mod error;
mod event;
mod hook;
mod listener;

pub use delivery::FocusCallback;
pub use error::{HookError, StartError, StopError};
pub use event::{FocusEvent, RawNotification, accepts, normalize};
pub use hook::{HyprlandHook, PlatformHook, RawHandler, Subscription, X11Hook, detect};
pub use listener::{FocusListener, ListenerConfig};
