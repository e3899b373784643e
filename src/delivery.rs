//! Cross-context event delivery.
//!
//! Accepted events are pushed into an unbounded FIFO channel from the hook's
//! background context and handed to the consumer callback by a single worker
//! task, so deliveries are serialized and ordered and the hook context never
//! blocks on the consumer.

use crate::error::StopError;
use crate::event::FocusEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consumer callback, invoked with exactly the focused window's title.
///
/// Invocations are serialized per handle and never happen after `stop()`
/// has returned.
pub type FocusCallback = Box<dyn FnMut(String) + Send>;

/// The consumer-side half of the hand-off: one worker task draining the
/// event queue into the callback.
pub(crate) struct DeliveryChannel {
    worker: Option<JoinHandle<()>>,
}

impl DeliveryChannel {
    /// Spawn the delivery worker and return the producer side.
    ///
    /// The worker exits once every producer handle has been dropped and the
    /// queue is drained.
    pub(crate) fn spawn(mut callback: FocusCallback) -> (Self, mpsc::UnboundedSender<FocusEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<FocusEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(
                    "Delivering focus event: pid={} title={:?}",
                    event.owner_pid, event.title
                );
                callback(event.title);
            }
            debug!("Delivery worker drained, exiting");
        });

        (
            Self {
                worker: Some(worker),
            },
            tx,
        )
    }

    /// Wait for the worker to drain and exit.
    ///
    /// Must be called after the producer side is gone, otherwise the worker
    /// never terminates and the bound elapses.
    pub(crate) async fn close(&mut self, timeout: Duration) -> Result<(), StopError> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // Consumer callback panicked; the queue is gone either way.
                warn!("Delivery worker terminated abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                error!(
                    "Delivery worker did not drain within {:?}, abandoning it",
                    timeout
                );
                worker.abort();
                Err(StopError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl Drop for DeliveryChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
