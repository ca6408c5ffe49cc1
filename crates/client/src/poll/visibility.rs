//! Page visibility as a watchable boolean.

use std::sync::Arc;
use tokio::sync::watch;

/// Source of foreground/background transitions.
///
/// The receiver yields the current state and is notified on change.
/// Implementations must only notify when the state actually flips: a
/// notification whose value matches the previous one is read as a round trip.
/// Dropping the receiver unsubscribes.
pub trait VisibilitySignal {
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Visibility driven by explicit calls.
///
/// Used where no real page exists (the CLI is always visible) and in tests.
#[derive(Debug, Clone)]
pub struct ManualVisibility {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualVisibility {
    pub fn new(visible: bool) -> Self {
        let (tx, _rx) = watch::channel(visible);
        Self { tx: Arc::new(tx) }
    }

    /// Permanently foreground.
    pub fn always_visible() -> Self {
        Self::new(true)
    }

    /// Update the state; subscribers are only notified on an actual change.
    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            *current = visible;
            true
        });
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl VisibilitySignal for ManualVisibility {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
