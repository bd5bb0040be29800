use crossbeam::channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex};

/// A simple, unbounded broadcast channel for low-throughput use cases.
///
/// Each `subscribe()` call gets its own channel; `broadcast()` fans a message out
/// to every still-connected subscriber. Used by the Lab Registry to implement
/// `subscribe(channel)` per §4.3: one broadcaster per channel (`all`, `lab:<id>`,
/// `kind:<k>`).
///
/// Not optimized for high throughput, and subscribers that never drain will grow
/// their channel without bound.
#[derive(Debug, Clone, Default)]
pub struct UnboundedBroadcast<T> {
    subscribed_senders: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T> UnboundedBroadcast<T>
where
    T: Clone,
{
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.subscribed_senders
            .lock()
            .expect("failed to acquire the lock")
            .push(tx);
        rx
    }

    /// Sends `message` to all registered non-disconnected subscribers. Never
    /// blocks (unbounded channel) and never fails: disconnected subscribers are
    /// simply dropped from the subscriber list.
    pub fn broadcast(&self, message: T) {
        self.subscribed_senders
            .lock()
            .expect("failed to acquire the lock")
            .retain(|s| s.send(message.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribed_senders
            .lock()
            .expect("failed to acquire the lock")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_subscriber_receives_broadcast() {
        let broadcaster = UnboundedBroadcast::default();
        let subs1 = broadcaster.subscribe();
        let subs2 = broadcaster.subscribe();

        broadcaster.broadcast("message");

        assert_eq!(subs1.recv().unwrap(), "message");
        assert_eq!(subs2.recv().unwrap(), "message");
    }

    #[test]
    fn cloned_broadcaster_shares_subscribers() {
        let broadcaster = UnboundedBroadcast::default();
        let cloned = broadcaster.clone();
        let subs1 = broadcaster.subscribe();

        broadcaster.broadcast("foo");
        cloned.broadcast("bar");

        assert_eq!(subs1.recv().unwrap(), "foo");
        assert_eq!(subs1.recv().unwrap(), "bar");
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let broadcaster = UnboundedBroadcast::default();
        let subs1 = broadcaster.subscribe();
        let subs2 = broadcaster.subscribe();
        drop(subs2);

        broadcaster.broadcast("message");

        assert_eq!(subs1.recv().unwrap(), "message");
        assert_eq!(broadcaster.subscriber_count(), 1);
    }
}
