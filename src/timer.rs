//! One-shot aging timer glue.
//!
//! Each armed timer is a spawned task racing a sleep against a cancellation
//! token. Dropping the [`AgingTimer`] cancels the task, which covers both
//! explicit cancellation (buffer drained, session stopped) and replacement
//! by a later arm. Cancellation alone is not a completion guarantee: a fire
//! that was already past the sleep when the token flipped still runs, so
//! the fire path re-validates the slot generation and arm epoch under the
//! session lock before touching anything.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A pending one-shot aging timer for a single session.
#[derive(Debug)]
pub(crate) struct AgingTimer {
    token: CancellationToken,
    epoch: u64,
}

impl AgingTimer {
    /// Arm a timer that drives `on_fire` after `after` elapses, unless
    /// cancelled first.
    pub(crate) fn arm<F>(after: Duration, epoch: u64, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => on_fire.await,
            }
        });
        Self { token, epoch }
    }

    /// Arm epoch this timer was created under.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for AgingTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_deadline() {
        let fired = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&fired);
        let _timer = AgingTimer::arm(Duration::from_millis(50), 1, async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_before_fire() {
        let fired = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&fired);
        let timer = AgingTimer::arm(Duration::from_millis(50), 1, async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(timer.epoch(), 1);
        drop(timer);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
