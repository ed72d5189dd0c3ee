use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Debounce is a single-slot buffer with a restartable timer.
///
/// Each pushed value replaces the buffered one and restarts the timer.
/// The buffered value becomes ready only once the timer survives a full
/// quiet `window` without another push. Without a window, values are
/// passed through as they're pushed.
pub struct Debounce<T> {
    window: Option<Duration>,
    slot: Option<T>,
    // Created on first use, as Sleep must be built within a runtime.
    timer: Option<Pin<Box<Sleep>>>,
}

impl<T> Debounce<T> {
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            slot: None,
            timer: None,
        }
    }

    /// Push a value, returning it back if it's immediately ready
    /// (there is no debounce window). Otherwise it's buffered,
    /// displacing and dropping a previously buffered value.
    pub fn push(&mut self, value: T) -> Option<T> {
        let Some(window) = self.window else {
            return Some(value);
        };
        let deadline = deadline_after(window);

        match &mut self.timer {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
        self.slot = Some(value);

        None
    }

    /// Returns true if a value is buffered and awaiting its quiet window.
    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Take the buffered value without waiting for its window to elapse.
    pub fn flush(&mut self) -> Option<T> {
        self.slot.take()
    }

    /// Wait for the buffered value's quiet window to elapse, and then take it.
    /// Resolves to None if no value is buffered.
    ///
    /// ready() is cancellation safe: if it's dropped before it resolves,
    /// the buffered value is retained.
    pub async fn ready(&mut self) -> Option<T> {
        if self.slot.is_none() {
            return None;
        }
        if let Some(timer) = &mut self.timer {
            timer.as_mut().await;
        }
        self.slot.take()
    }
}

// Instant `window` from now, saturating at a far-future deadline
// which is never reached.
pub(crate) fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_only_last_of_burst_survives() {
        let started = Instant::now();
        let mut debounce = Debounce::new(Some(Duration::from_millis(500)));

        assert_eq!(debounce.push("a"), None);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(debounce.push("b"), None);
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(debounce.push("c"), None);

        assert_eq!(debounce.ready().await, Some("c"));
        assert_eq!(started.elapsed(), Duration::from_millis(1000));

        assert!(!debounce.is_pending());
        assert_eq!(debounce.ready().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_restarts_after_firing() {
        let started = Instant::now();
        let mut debounce = Debounce::new(Some(Duration::from_millis(500)));

        debounce.push(1);
        assert_eq!(debounce.ready().await, Some(1));

        tokio::time::advance(Duration::from_millis(2000)).await;
        debounce.push(2);
        assert_eq!(debounce.ready().await, Some(2));
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ready_retains_value() {
        let mut debounce = Debounce::new(Some(Duration::from_millis(500)));
        debounce.push("a");

        let timed_out =
            tokio::time::timeout(Duration::from_millis(100), debounce.ready()).await;
        assert!(timed_out.is_err());

        assert!(debounce.is_pending());
        assert_eq!(debounce.flush(), Some("a"));
        assert_eq!(debounce.flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_window_never_fires() {
        let mut debounce = Debounce::new(Some(Duration::MAX));
        assert_eq!(debounce.push("a"), None);

        let timed_out =
            tokio::time::timeout(Duration::from_secs(86400), debounce.ready()).await;
        assert!(timed_out.is_err());
        assert_eq!(debounce.flush(), Some("a"));
    }

    #[test]
    fn test_pass_through_without_window() {
        let mut debounce = Debounce::new(None);
        assert_eq!(debounce.push("a"), Some("a"));
        assert!(!debounce.is_pending());
    }
}
