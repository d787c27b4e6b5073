use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::StatusChange;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Broadcasts status transitions to display and persistence listeners
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StatusChange>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a transition for `url`. Never blocks.
    pub fn on_change(&self, name: &str, url: &str, previous: u16, current: u16) {
        let change = StatusChange {
            name: name.to_string(),
            url: url.to_string(),
            previous,
            current,
            observed_at: Utc::now(),
        };
        self.publish(change);
    }

    fn publish(&self, change: StatusChange) {
        debug!(url = %change.url, status = change.current, "publishing status change");
        // No receivers is fine
        let _ = self.tx.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let notifier = ChangeNotifier::new(8);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.on_change("api", "http://x/health", 0, 200);

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.url, "http://x/health");
        assert_eq!(a.previous, 0);
        assert_eq!(a.current, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn publishing_without_subscribers_does_not_fail() {
        let notifier = ChangeNotifier::default();
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.on_change("api", "http://x/health", 200, 503);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let notifier = ChangeNotifier::new(1);
        let mut rx = notifier.subscribe();

        notifier.on_change("api", "http://x", 0, 200);
        notifier.on_change("api", "http://x", 200, 503);

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(1))));
        assert_eq!(rx.recv().await.unwrap().current, 503);
    }
}
