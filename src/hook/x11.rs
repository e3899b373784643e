//! X11 focus hook via EWMH root-window properties.
//!
//! Watches PropertyNotify on the root window's `_NET_ACTIVE_WINDOW` and reads
//! the focused window's title (`_NET_WM_NAME`, falling back to `WM_NAME`) and
//! owning pid (`_NET_WM_PID`). The blocking X event loop runs on a dedicated
//! thread and polls for cooperative cancellation.

use super::{PlatformHook, RawHandler, Subscription};
use crate::error::HookError;
use crate::event::RawNotification;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt, EventMask, Window,
};
use x11rb::rust_connection::RustConnection;

/// How often the event loop checks for cancellation when no events are queued.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// X11 focus hook.
pub struct X11Hook;

impl X11Hook {
    /// Create a new X11 hook.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for X11Hook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHook for X11Hook {
    async fn subscribe(&mut self, handler: RawHandler) -> Result<Subscription, HookError> {
        // Connect and register off the async runtime; registration is
        // confirmed before subscribe returns.
        let (conn, root, atoms) = tokio::task::spawn_blocking(connect_and_register)
            .await
            .map_err(|e| HookError::X11ConnectionFailed(e.to_string()))??;

        info!("Subscribed to _NET_ACTIVE_WINDOW changes on root window {root}");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let driver = tokio::task::spawn_blocking(move || {
            run_event_loop(&conn, root, &atoms, &token, handler);
        });

        Ok(Subscription::new(cancel, driver))
    }
}

/// EWMH atoms used by the hook.
struct Atoms {
    net_active_window: Atom,
    net_wm_name: Atom,
    net_wm_pid: Atom,
    utf8_string: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self, HookError> {
        Ok(Self {
            net_active_window: intern_atom(conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_name: intern_atom(conn, b"_NET_WM_NAME")?,
            net_wm_pid: intern_atom(conn, b"_NET_WM_PID")?,
            utf8_string: intern_atom(conn, b"UTF8_STRING")?,
        })
    }
}

fn intern_atom(conn: &RustConnection, name: &[u8]) -> Result<Atom, HookError> {
    Ok(conn
        .intern_atom(false, name)
        .map_err(|e| HookError::X11RequestFailed(e.to_string()))?
        .reply()
        .map_err(|e| HookError::X11RequestFailed(e.to_string()))?
        .atom)
}

/// Connect to the X server and select PropertyChange on the root window.
fn connect_and_register() -> Result<(RustConnection, Window, Atoms), HookError> {
    let (conn, screen_num) =
        x11rb::connect(None).map_err(|e| HookError::X11ConnectionFailed(e.to_string()))?;

    let root = conn.setup().roots[screen_num].root;
    let atoms = Atoms::intern(&conn)?;

    conn.change_window_attributes(
        root,
        &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
    )
    .map_err(|e| HookError::X11RequestFailed(e.to_string()))?
    .check()
    .map_err(|e| HookError::X11RequestFailed(e.to_string()))?;

    Ok((conn, root, atoms))
}

/// Poll the X event queue until cancelled.
///
/// Consecutive notifications for the same window are collapsed; the property
/// can be rewritten without an actual transition.
fn run_event_loop(
    conn: &RustConnection,
    root: Window,
    atoms: &Atoms,
    cancel: &CancellationToken,
    mut handler: RawHandler,
) {
    let mut last_window: Option<Window> = None;

    while !cancel.is_cancelled() {
        match conn.poll_for_event() {
            Ok(Some(Event::PropertyNotify(ev)))
                if ev.window == root && ev.atom == atoms.net_active_window =>
            {
                let window = active_window(conn, root, atoms);
                if last_window == Some(window) {
                    trace!("Active window unchanged: {window}");
                    continue;
                }
                last_window = Some(window);

                if window == 0 {
                    // No window focused (e.g., desktop). Forward as an
                    // identity-less payload.
                    handler(RawNotification::default());
                } else {
                    handler(RawNotification {
                        window_id: Some(format!("0x{window:x}")),
                        title: window_title(conn, window, atoms),
                        owner_pid: window_pid(conn, window, atoms),
                    });
                }
            }
            Ok(Some(other)) => {
                trace!("Ignoring X11 event: {other:?}");
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("X11 event stream error: {}", e);
                break;
            }
        }
    }

    debug!("X11 event loop exiting");
}

/// Read `_NET_ACTIVE_WINDOW` from the root window. Zero means none.
fn active_window(conn: &RustConnection, root: Window, atoms: &Atoms) -> Window {
    let reply = conn
        .get_property(false, root, atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
        .ok()
        .and_then(|cookie| cookie.reply().ok());

    reply
        .and_then(|r| r.value32().and_then(|mut it| it.next()))
        .unwrap_or(0)
}

/// Read the window title, preferring `_NET_WM_NAME` over legacy `WM_NAME`.
///
/// The window may already be destroyed when we get here; failures are `None`.
fn window_title(conn: &RustConnection, window: Window, atoms: &Atoms) -> Option<String> {
    let net_name = read_property_bytes(conn, window, atoms.net_wm_name, atoms.utf8_string);
    let bytes = match net_name {
        Some(v) if !v.is_empty() => v,
        _ => read_property_bytes(conn, window, AtomEnum::WM_NAME.into(), AtomEnum::STRING.into())?,
    };

    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read the owning pid from `_NET_WM_PID`, if the client set it.
fn window_pid(conn: &RustConnection, window: Window, atoms: &Atoms) -> Option<i64> {
    let reply = conn
        .get_property(false, window, atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)
        .ok()?
        .reply()
        .ok()?;

    reply
        .value32()
        .and_then(|mut it| it.next())
        .map(i64::from)
}

fn read_property_bytes(
    conn: &RustConnection,
    window: Window,
    property: Atom,
    type_: Atom,
) -> Option<Vec<u8>> {
    let reply = conn
        .get_property(false, window, property, type_, 0, u32::MAX)
        .ok()?
        .reply()
        .ok()?;

    Some(reply.value)
}
