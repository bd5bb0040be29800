use super::channel::EventConsumer;
use crossbeam::channel::RecvTimeoutError;
use std::time::Duration;

/// The cancellation channel carries no payload: receiving *anything*, or the
/// channel closing, both mean "stop".
pub type CancellationMessage = ();

impl EventConsumer<CancellationMessage> {
    /// Blocks up to `timeout` waiting for a cancellation signal.
    ///
    /// Returns `true` if a signal (or channel close) was observed before the
    /// timeout elapsed, `false` if the timeout elapsed with no signal. Every
    /// cooperative loop (polling tick, deploy task, mission step) calls this at
    /// its suspension points per §5.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        let timed_out = matches!(
            self.as_ref().recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        );
        !timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::pub_sub;
    use std::time::Duration;

    #[test]
    fn not_cancelled_until_signalled() {
        let (_publisher, consumer) = pub_sub::<()>();
        assert!(!consumer.is_cancelled(Duration::from_millis(10)));
    }

    #[test]
    fn cancelled_once_signalled() {
        let (publisher, consumer) = pub_sub::<()>();
        publisher.publish(()).unwrap();
        assert!(consumer.is_cancelled(Duration::from_secs(1)));
    }

    #[test]
    fn cancelled_when_publisher_dropped() {
        let (publisher, consumer) = pub_sub::<()>();
        drop(publisher);
        assert!(consumer.is_cancelled(Duration::from_secs(1)));
    }
}
