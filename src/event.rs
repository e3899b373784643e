//! Focus event model, normalization, and process filtering.
//!
//! Every platform hook reduces its native notification to a [`RawNotification`];
//! [`normalize`] turns that into a canonical [`FocusEvent`] or drops it.

/// A normalized focus-change event.
///
/// Produced once per foreground-window transition. `owner_pid` is the pid of
/// the process that owned the window at the moment of the transition, even if
/// that process has since exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    /// Title of the newly focused window. May be empty if the window has none.
    pub title: String,

    /// OS process id of the application owning the window.
    pub owner_pid: u32,
}

/// Raw payload delivered by a platform hook, before normalization.
///
/// Fields are optional because platforms report incomplete identities for
/// transient states (desktop focused, window mid-destruction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawNotification {
    /// Backend-specific window identifier (e.g., "0xabc123" or an X window id).
    pub window_id: Option<String>,

    /// Window title, if the platform reported one.
    pub title: Option<String>,

    /// Owning process id, if the platform reported one. Signed because some
    /// platforms hand back sentinel values for "no window".
    pub owner_pid: Option<i64>,
}

/// Convert a raw platform notification into a canonical [`FocusEvent`].
///
/// Returns `None` when the payload does not identify a real foreground window:
/// no usable pid, or neither a window id nor a title. Never panics; callers
/// count drops as a diagnostic.
pub fn normalize(raw: &RawNotification) -> Option<FocusEvent> {
    let owner_pid = u32::try_from(raw.owner_pid?).ok().filter(|&pid| pid > 0)?;
    if raw.window_id.is_none() && raw.title.is_none() {
        return None;
    }

    Some(FocusEvent {
        title: raw.title.clone().unwrap_or_default(),
        owner_pid,
    })
}

/// Check an event against an optional target process id.
///
/// No target accepts everything; a target accepts only its own windows.
#[must_use]
pub fn accepts(event: &FocusEvent, target_pid: Option<u32>) -> bool {
    match target_pid {
        Some(pid) => event.owner_pid == pid,
        None => true,
    }
}
