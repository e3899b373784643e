//! Hyprland IPC focus hook.
//!
//! Subscribes to Hyprland's socket2 event stream and parses
//! activewindow/activewindowv2 events. The owning pid is resolved per
//! transition through the control socket's `j/activewindow` JSON query.

use super::{PlatformHook, RawHandler, Subscription};
use crate::error::HookError;
use crate::event::RawNotification;
use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Hyprland focus hook.
pub struct HyprlandHook;

impl HyprlandHook {
    /// Create a new Hyprland hook.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for HyprlandHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHook for HyprlandHook {
    async fn subscribe(&mut self, handler: RawHandler) -> Result<Subscription, HookError> {
        let event_path = socket_path(".socket2.sock")?;
        let control_path = socket_path(".socket.sock")?;

        info!("Connecting to Hyprland socket2: {}", event_path.display());
        let stream = UnixStream::connect(&event_path)
            .await
            .map_err(|e| HookError::ConnectionFailed(e.to_string()))?;
        info!("Connected to Hyprland socket2");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let driver = tokio::spawn(async move {
            run_event_loop(stream, event_path, control_path, token, handler).await;
        });

        Ok(Subscription::new(cancel, driver))
    }
}

/// Drive the socket2 event stream until cancelled, reconnecting with capped
/// exponential backoff when the compositor drops the connection.
async fn run_event_loop(
    stream: UnixStream,
    event_path: PathBuf,
    control_path: PathBuf,
    cancel: CancellationToken,
    mut handler: RawHandler,
) {
    const MAX_BACKOFF: Duration = Duration::from_secs(5);

    let mut reader = Some(BufReader::new(stream));
    let mut state = WindowState::default();
    let mut backoff = Duration::from_millis(250);

    loop {
        let Some(r) = reader.as_mut() else {
            // Reconnect path. The socket may be gone while the compositor
            // restarts; keep retrying until cancelled.
            warn!("Socket2 connection lost. Retrying in {:?}...", backoff);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);

            match UnixStream::connect(&event_path).await {
                Ok(stream) => {
                    info!("Reconnected to Hyprland socket2");
                    reader = Some(BufReader::new(stream));
                    backoff = Duration::from_millis(250);
                }
                Err(e) => {
                    warn!("Reconnect failed: {}", e);
                }
            }
            continue;
        };

        let mut line = String::new();
        tokio::select! {
            () = cancel.cancelled() => break,
            result = r.read_line(&mut line) => match result {
                Ok(0) => {
                    warn!("Socket2 stream ended (EOF)");
                    reader = None;
                }
                Ok(_) => {
                    trace!("Received line: {}", line.trim());
                    if let Some(raw) = state.update(parse_line(&line)) {
                        let raw = resolve_pid(raw, &control_path).await;
                        handler(raw);
                    }
                }
                Err(e) => {
                    warn!("Read error: {}", e);
                    reader = None;
                }
            }
        }
    }

    debug!("Hyprland event loop exiting");
}

/// Fill in the owning pid via the control socket, if it is still unknown.
///
/// The query returns the compositor's *current* active window, which may
/// already be a later one when events arrive in a burst. The pid is attached
/// only when the reply's address matches the event's window; otherwise it
/// stays unset and the normalizer drops the event as a diagnostic instead of
/// delivering a pid that never owned the window.
async fn resolve_pid(mut raw: RawNotification, control_path: &Path) -> RawNotification {
    let Some(window_id) = raw.window_id.clone() else {
        return raw;
    };
    if raw.owner_pid.is_some() {
        return raw;
    }

    match query_active_window(control_path).await {
        Ok(reply) if reply.pid > 0 && same_window(&reply.address, &window_id) => {
            raw.owner_pid = Some(reply.pid);
        }
        Ok(reply) => debug!(
            "Active window moved on before pid resolution (reply address {:?}, event window {}); leaving pid unset",
            reply.address, window_id
        ),
        Err(e) => warn!("Failed to resolve owner pid: {}", e),
    }

    raw
}

/// Active window description from the control socket.
#[derive(Debug, Deserialize)]
struct ActiveWindowReply {
    #[serde(default)]
    address: String,

    #[serde(default)]
    pid: i64,
}

/// Compare window addresses, tolerating a missing `0x` prefix and case
/// differences between socket2 lines and control-socket JSON.
fn same_window(a: &str, b: &str) -> bool {
    fn canonical(addr: &str) -> &str {
        addr.strip_prefix("0x").unwrap_or(addr)
    }

    !a.is_empty() && canonical(a).eq_ignore_ascii_case(canonical(b))
}

/// Query `j/activewindow` on Hyprland's control socket.
async fn query_active_window(path: &Path) -> Result<ActiveWindowReply, HookError> {
    let mut stream = UnixStream::connect(path)
        .await
        .map_err(|e| HookError::ControlQueryFailed(e.to_string()))?;

    stream
        .write_all(b"j/activewindow")
        .await
        .map_err(|e| HookError::ControlQueryFailed(e.to_string()))?;

    let mut buf = String::new();
    stream
        .read_to_string(&mut buf)
        .await
        .map_err(|e| HookError::ControlQueryFailed(e.to_string()))?;

    serde_json::from_str(&buf).map_err(|e| HookError::ControlQueryFailed(e.to_string()))
}

/// Resolve a socket file under Hyprland's runtime directory.
fn socket_path(name: &str) -> Result<PathBuf, HookError> {
    let xdg_runtime_dir = env::var("XDG_RUNTIME_DIR")
        .map_err(|_| HookError::EnvVarNotSet("XDG_RUNTIME_DIR".to_string()))?;

    let hyprland_sig = env::var("HYPRLAND_INSTANCE_SIGNATURE")
        .map_err(|_| HookError::EnvVarNotSet("HYPRLAND_INSTANCE_SIGNATURE".to_string()))?;

    let path = PathBuf::from(&xdg_runtime_dir)
        .join("hypr")
        .join(&hyprland_sig)
        .join(name);

    if !path.exists() {
        return Err(HookError::SocketNotFound(format!("{}", path.display())));
    }

    Ok(path)
}

/// Parsed IPC event from socket2.
#[derive(Debug, Clone)]
enum IpcEvent {
    /// activewindow>>WINDOWCLASS,WINDOWTITLE
    ActiveWindow { class: String, title: String },
    /// activewindowv2>>WINDOWADDRESS
    ActiveWindowV2 { address: String },
    /// Other events we don't care about.
    Other,
}

/// Parse a single line from the socket2 stream.
///
/// Format: EVENT>>DATA\n
fn parse_line(line: &str) -> IpcEvent {
    let line = line.trim_end();

    let Some((event_name, data)) = line.split_once(">>") else {
        trace!("Ignoring malformed line (no >>): {}", line);
        return IpcEvent::Other;
    };

    match event_name {
        "activewindow" => {
            // Title can contain commas, so split on the FIRST comma only
            let (class, title) = if let Some((c, t)) = data.split_once(',') {
                (c.to_string(), t.to_string())
            } else {
                (data.to_string(), String::new())
            };

            IpcEvent::ActiveWindow { class, title }
        }
        "activewindowv2" => IpcEvent::ActiveWindowV2 {
            address: data.to_string(),
        },
        _ => {
            trace!("Ignoring event: {}", event_name);
            IpcEvent::Other
        }
    }
}

/// Correlates activewindow and activewindowv2 lines into raw notifications.
///
/// For each transition the compositor sends activewindow (class/title) first
/// and activewindowv2 (address) second, so the title is stored and the
/// notification emitted when the matching address arrives. Emitting on the
/// address line keeps every notification tied to its own window rather than
/// a stale one.
#[derive(Debug, Default)]
struct WindowState {
    pending_title: Option<String>,
}

impl WindowState {
    /// Update state and return a raw notification if one is due.
    fn update(&mut self, event: IpcEvent) -> Option<RawNotification> {
        match event {
            IpcEvent::ActiveWindow { class, title } => {
                self.pending_title = if class.is_empty() || title.is_empty() {
                    None
                } else {
                    Some(title)
                };
                None
            }
            IpcEvent::ActiveWindowV2 { address } => {
                if address.is_empty() {
                    // No window focused (e.g., switching to an empty
                    // workspace). Forward as an identity-less payload.
                    self.pending_title = None;
                    return Some(RawNotification::default());
                }

                Some(RawNotification {
                    window_id: Some(address),
                    title: self.pending_title.take(),
                    owner_pid: None,
                })
            }
            IpcEvent::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::UnixListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_activewindow_simple() {
        let line = "activewindow>>firefox,Mozilla Firefox";
        match parse_line(line) {
            IpcEvent::ActiveWindow { class, title } => {
                assert_eq!(class, "firefox");
                assert_eq!(title, "Mozilla Firefox");
            }
            _ => panic!("Expected ActiveWindow event"),
        }
    }

    #[test]
    fn test_parse_activewindow_comma_in_title() {
        // Title contains commas - must split on first comma only
        let line = "activewindow>>code,listener.rs - focus-listener, Pair Programming";
        match parse_line(line) {
            IpcEvent::ActiveWindow { class, title } => {
                assert_eq!(class, "code");
                assert_eq!(title, "listener.rs - focus-listener, Pair Programming");
            }
            _ => panic!("Expected ActiveWindow event"),
        }
    }

    #[test]
    fn test_parse_activewindow_no_title() {
        let line = "activewindow>>kitty,";
        match parse_line(line) {
            IpcEvent::ActiveWindow { class, title } => {
                assert_eq!(class, "kitty");
                assert_eq!(title, "");
            }
            _ => panic!("Expected ActiveWindow event"),
        }
    }

    #[test]
    fn test_parse_activewindowv2() {
        let line = "activewindowv2>>0x55a1b2c3d4e5";
        match parse_line(line) {
            IpcEvent::ActiveWindowV2 { address } => {
                assert_eq!(address, "0x55a1b2c3d4e5");
            }
            _ => panic!("Expected ActiveWindowV2 event"),
        }
    }

    #[test]
    fn test_parse_other_events() {
        assert!(matches!(parse_line("workspace>>1"), IpcEvent::Other));
        assert!(matches!(
            parse_line("openwindow>>0x123,1,kitty,kitty"),
            IpcEvent::Other
        ));
        assert!(matches!(parse_line("closewindow>>0x123"), IpcEvent::Other));
    }

    #[test]
    fn test_parse_malformed_line() {
        assert!(matches!(parse_line("no separator"), IpcEvent::Other));
        assert!(matches!(parse_line(""), IpcEvent::Other));
    }

    #[test]
    fn test_parse_with_trailing_newline() {
        let line = "activewindow>>firefox,Title\n";
        match parse_line(line) {
            IpcEvent::ActiveWindow { class, title } => {
                assert_eq!(class, "firefox");
                assert_eq!(title, "Title");
            }
            _ => panic!("Expected ActiveWindow event"),
        }
    }

    #[test]
    fn test_state_emits_on_address_line() {
        let mut state = WindowState::default();

        // activewindow only stores; the address line completes the transition.
        assert!(
            state
                .update(IpcEvent::ActiveWindow {
                    class: "firefox".to_string(),
                    title: "Mozilla Firefox".to_string(),
                })
                .is_none()
        );

        let raw = state
            .update(IpcEvent::ActiveWindowV2 {
                address: "0xabc123".to_string(),
            })
            .expect("Should produce raw notification");

        assert_eq!(raw.window_id, Some("0xabc123".to_string()));
        assert_eq!(raw.title, Some("Mozilla Firefox".to_string()));
        assert_eq!(raw.owner_pid, None);
    }

    #[test]
    fn test_state_empty_address_yields_identityless_payload() {
        let mut state = WindowState::default();

        assert!(
            state
                .update(IpcEvent::ActiveWindow {
                    class: String::new(),
                    title: String::new(),
                })
                .is_none()
        );

        let raw = state
            .update(IpcEvent::ActiveWindowV2 {
                address: String::new(),
            })
            .expect("Empty address should still notify");

        assert_eq!(raw, RawNotification::default());
    }

    #[test]
    fn test_state_title_is_consumed_per_transition() {
        let mut state = WindowState::default();

        state.update(IpcEvent::ActiveWindow {
            class: "code".to_string(),
            title: "listener.rs".to_string(),
        });
        let first = state
            .update(IpcEvent::ActiveWindowV2 {
                address: "0xaaa".to_string(),
            })
            .unwrap();
        assert_eq!(first.title, Some("listener.rs".to_string()));

        // An address line without a fresh activewindow carries no stale title.
        let second = state
            .update(IpcEvent::ActiveWindowV2 {
                address: "0xbbb".to_string(),
            })
            .unwrap();
        assert_eq!(second.title, None);
    }

    #[test]
    fn test_control_reply_parses_pid_and_address() {
        let json = r#"{"address":"0x55a1b2c3d4e5","pid":4321,"class":"kitty","title":"~"}"#;
        let reply: ActiveWindowReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.pid, 4321);
        assert_eq!(reply.address, "0x55a1b2c3d4e5");
    }

    #[test]
    fn test_same_window_tolerates_prefix_and_case() {
        assert!(same_window("0xABC123", "abc123"));
        assert!(same_window("abc123", "0xabc123"));
        assert!(!same_window("0xabc123", "0xdef456"));
        assert!(!same_window("", "0xabc123"));
    }

    #[test]
    fn test_control_reply_tolerates_empty_object() {
        let reply: ActiveWindowReply = serde_json::from_str("{}").unwrap();
        assert_eq!(reply.pid, 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_subscribe_streams_events_from_fake_compositor() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let dir = tempfile::tempdir().unwrap();
        let instance_dir = dir.path().join("hypr").join("test-sig");
        std::fs::create_dir_all(&instance_dir).unwrap();

        let event_listener = UnixListener::bind(instance_dir.join(".socket2.sock")).unwrap();
        let control_listener = UnixListener::bind(instance_dir.join(".socket.sock")).unwrap();

        unsafe {
            env::set_var("XDG_RUNTIME_DIR", dir.path());
            env::set_var("HYPRLAND_INSTANCE_SIGNATURE", "test-sig");
        }

        // Fake compositor: one socket2 event stream, control queries answered
        // with a fixed active window.
        tokio::spawn(async move {
            let (mut stream, _) = event_listener.accept().await.unwrap();
            stream.write_all(b"activewindow>>kitty,~\n").await.unwrap();
            stream.write_all(b"activewindowv2>>0xabc\n").await.unwrap();
            // Keep the stream open until the test is done.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = control_listener.accept().await.unwrap();
                let mut request = [0u8; 64];
                let _ = stream.read(&mut request).await;
                stream
                    .write_all(br#"{"address":"0xabc","pid":4321,"class":"kitty","title":"~"}"#)
                    .await
                    .unwrap();
                // Dropping the stream signals end-of-reply.
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hook = HyprlandHook::new();
        let mut subscription = hook
            .subscribe(Box::new(move |raw| {
                let _ = tx.send(raw);
            }))
            .await
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for raw notification")
            .expect("Handler dropped unexpectedly");
        assert_eq!(raw.window_id.as_deref(), Some("0xabc"));
        assert_eq!(raw.title.as_deref(), Some("~"));
        assert_eq!(raw.owner_pid, Some(4321));

        subscription.release(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_burst_does_not_attach_later_pid_to_earlier_window() {
        let dir = tempfile::tempdir().unwrap();
        let instance_dir = dir.path().join("hypr").join("test-sig");
        std::fs::create_dir_all(&instance_dir).unwrap();

        let event_listener = UnixListener::bind(instance_dir.join(".socket2.sock")).unwrap();
        let control_listener = UnixListener::bind(instance_dir.join(".socket.sock")).unwrap();

        unsafe {
            env::set_var("XDG_RUNTIME_DIR", dir.path());
            env::set_var("HYPRLAND_INSTANCE_SIGNATURE", "test-sig");
        }

        // Two transitions arrive in one burst; by the time either pid query
        // runs, the compositor's active window is already the second one.
        tokio::spawn(async move {
            let (mut stream, _) = event_listener.accept().await.unwrap();
            stream
                .write_all(b"activewindow>>appa,WindowA\nactivewindowv2>>0xaaa\nactivewindow>>appb,WindowB\nactivewindowv2>>0xbbb\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = control_listener.accept().await.unwrap();
                let mut request = [0u8; 64];
                let _ = stream.read(&mut request).await;
                stream
                    .write_all(br#"{"address":"0xbbb","pid":2222,"class":"appb","title":"WindowB"}"#)
                    .await
                    .unwrap();
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hook = HyprlandHook::new();
        let mut subscription = hook
            .subscribe(Box::new(move |raw| {
                let _ = tx.send(raw);
            }))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for first notification")
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for second notification")
            .unwrap();

        // The stale reply must not label WindowA with WindowB's pid; the
        // first event stays pid-less and gets dropped by the normalizer.
        assert_eq!(first.window_id.as_deref(), Some("0xaaa"));
        assert_eq!(first.title.as_deref(), Some("WindowA"));
        assert_eq!(first.owner_pid, None);

        assert_eq!(second.window_id.as_deref(), Some("0xbbb"));
        assert_eq!(second.title.as_deref(), Some("WindowB"));
        assert_eq!(second.owner_pid, Some(2222));

        subscription.release(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_subscribe_fails_without_sockets() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            env::set_var("XDG_RUNTIME_DIR", dir.path());
            env::set_var("HYPRLAND_INSTANCE_SIGNATURE", "missing-sig");
        }

        let mut hook = HyprlandHook::new();
        let result = hook.subscribe(Box::new(|_| {})).await;
        assert!(matches!(result, Err(HookError::SocketNotFound(_))));
    }
}
