//! Listener handle and lifecycle state machine.
//!
//! A [`FocusListener`] owns at most one platform subscription and one delivery
//! worker. Lifecycle state is tracked atomically so `start`/`stop` can be
//! called through `&self` from any task; overlapping lifecycle calls are
//! rejected rather than queued.

use crate::delivery::{DeliveryChannel, FocusCallback};
use crate::error::{HookError, StartError, StopError};
use crate::event;
use crate::hook::{self, PlatformHook, RawHandler, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

/// Timing bounds for lifecycle operations.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bound on OS registration during `start`. Exceeding it fails the start
    /// with [`StartError::PlatformUnavailable`].
    pub start_timeout: Duration,

    /// Bound on background-context shutdown during `stop`. Exceeding it
    /// abandons the context and surfaces [`StopError::ShutdownTimeout`].
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Lifecycle states. `Failed` is only left by discarding the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Failed = 4,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Failed,
        }
    }
}

/// Resources owned while the listener is running.
struct Active {
    subscription: Subscription,
    delivery: DeliveryChannel,
}

/// Handle for one focus-monitoring session.
///
/// Holds at most one active platform subscription at any time. `start` on a
/// non-idle handle fails fast with [`StartError::AlreadyStarted`]; after a
/// successful `stop` the handle is reusable. Dropping a running handle tears
/// the background context down without waiting.
pub struct FocusListener {
    state: AtomicU8,
    hook: Mutex<Option<Box<dyn PlatformHook>>>,
    active: Mutex<Option<Active>>,
    dropped: Arc<AtomicU64>,
    config: ListenerConfig,
}

impl FocusListener {
    /// Create a listener; the platform hook is detected at `start` time.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, ListenerConfig::default())
    }

    /// Create a listener with explicit timing bounds.
    #[must_use]
    pub fn with_config(config: ListenerConfig) -> Self {
        Self::build(None, config)
    }

    /// Create a listener driven by the given hook instead of detection.
    #[must_use]
    pub fn with_hook(hook: Box<dyn PlatformHook>) -> Self {
        Self::build(Some(hook), ListenerConfig::default())
    }

    fn build(hook: Option<Box<dyn PlatformHook>>, config: ListenerConfig) -> Self {
        Self {
            state: AtomicU8::new(State::Idle as u8),
            hook: Mutex::new(hook),
            active: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Start monitoring focus changes.
    ///
    /// `callback` is invoked with the title of every newly focused window
    /// owned by `target_pid` (or by any process when `target_pid` is `None`),
    /// serialized and in OS order. Returns once the OS registration is
    /// confirmed.
    pub async fn start(
        &self,
        target_pid: Option<u32>,
        callback: FocusCallback,
    ) -> Result<(), StartError> {
        if self
            .state
            .compare_exchange(
                State::Idle as u8,
                State::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(StartError::AlreadyStarted);
        }

        match self.register(target_pid, callback).await {
            Ok(active) => {
                *self.active.lock().await = Some(active);
                self.state.store(State::Running as u8, Ordering::Release);
                info!("Listener running (target_pid={:?})", target_pid);
                Ok(())
            }
            Err(e) => {
                self.state.store(State::Failed as u8, Ordering::Release);
                error!("Failed to start listener: {}", e);
                Err(StartError::PlatformUnavailable(e))
            }
        }
    }

    /// Stop monitoring and release all OS resources.
    ///
    /// Blocks until the background context has deregistered and every queued
    /// event has been delivered; the callback is never invoked after this
    /// returns. No-op on an idle or failed handle.
    pub async fn stop(&self) -> Result<(), StopError> {
        if let Err(current) = self.state.compare_exchange(
            State::Running as u8,
            State::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match State::from_u8(current) {
                State::Idle | State::Failed => Ok(()),
                _ => Err(StopError::ConcurrentLifecycleOperation),
            };
        }

        let active = self.active.lock().await.take();
        let Some(mut active) = active else {
            self.state.store(State::Idle as u8, Ordering::Release);
            return Ok(());
        };

        // Release the OS registration first so the hook context stops
        // producing, then drain the delivery queue into the callback.
        let released = active
            .subscription
            .release(self.config.shutdown_timeout)
            .await;
        let drained = active.delivery.close(self.config.shutdown_timeout).await;

        self.state.store(State::Idle as u8, Ordering::Release);

        if let Err(bound) = released {
            return Err(StopError::ShutdownTimeout(bound));
        }
        drained?;

        info!("Listener stopped");
        Ok(())
    }

    /// Number of raw notifications dropped as malformed or identity-less.
    ///
    /// Diagnostic only; drops never fail the listener.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the delivery worker and subscribe the hook under the start bound.
    async fn register(
        &self,
        target_pid: Option<u32>,
        callback: FocusCallback,
    ) -> Result<Active, HookError> {
        let mut guard = self.hook.lock().await;
        let hook = match guard.take() {
            Some(hook) => guard.insert(hook),
            None => guard.insert(hook::detect()?),
        };

        let (delivery, event_tx) = DeliveryChannel::spawn(callback);

        // Runs on the hook's background context: normalize, filter, enqueue.
        // Never blocks.
        let dropped = self.dropped.clone();
        let handler: RawHandler = Box::new(move |raw| match event::normalize(&raw) {
            Some(ev) if event::accepts(&ev, target_pid) => {
                if event_tx.send(ev).is_err() {
                    debug!("Delivery channel closed, discarding event");
                }
            }
            Some(ev) => trace!("Filtered out event from pid {}", ev.owner_pid),
            None => {
                dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped malformed or identity-less notification: {:?}", raw);
            }
        });

        let bound = self.config.start_timeout;
        let subscription = match tokio::time::timeout(bound, hook.subscribe(handler)).await {
            Ok(Ok(sub)) => sub,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(HookError::SubscribeTimeout(bound)),
        };

        Ok(Active {
            subscription,
            delivery,
        })
    }
}

impl Default for FocusListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FocusListener {
    fn drop(&mut self) {
        // Best-effort teardown when the handle is discarded without stop():
        // cancel and abort the background context, never wait.
        if let Ok(mut guard) = self.active.try_lock()
            && let Some(active) = guard.take()
        {
            warn!("Listener dropped while running; abandoning background context");
            drop(active);
        }
    }
}
