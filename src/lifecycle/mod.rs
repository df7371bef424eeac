//! Idle-shutdown governor.
//!
//! The service terminates itself after a configurable period with no
//! accepted requests. The governor owns the countdown: `touch()` on
//! every accepted request resets it to the full duration, and a
//! background task raises the shutdown signal exactly once when the
//! idle period elapses. There is no maximum total uptime, only maximum
//! idle time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// How often the countdown is re-checked when far from expiry.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Injected idle-timeout state shared across request handlers.
///
/// Cheap to clone; all clones share one countdown.
#[derive(Clone)]
pub struct LifecycleGovernor {
    inner: Arc<Inner>,
}

struct Inner {
    timeout: Duration,
    last_activity: Mutex<Instant>,
    shutdown: Notify,
    expired: AtomicBool,
}

impl LifecycleGovernor {
    /// Arm the countdown starting now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                timeout,
                last_activity: Mutex::new(Instant::now()),
                shutdown: Notify::new(),
                expired: AtomicBool::new(false),
            }),
        }
    }

    /// Record activity: the countdown restarts at the full duration.
    pub fn touch(&self) {
        let mut last = self
            .inner
            .last_activity
            .lock()
            .expect("lifecycle mutex poisoned");
        *last = Instant::now();
    }

    /// Time since the last accepted request.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_activity
            .lock()
            .expect("lifecycle mutex poisoned")
            .elapsed()
    }

    /// Whether the countdown has already fired.
    pub fn is_expired(&self) -> bool {
        self.inner.expired.load(Ordering::SeqCst)
    }

    /// Run the countdown until it fires. Single-shot: the loop exits
    /// after raising the shutdown signal.
    pub async fn run(&self) {
        info!(
            "Idle shutdown armed: {} minutes without requests ends the process",
            self.inner.timeout.as_secs() / 60
        );

        loop {
            let idle = self.idle_for();
            if idle >= self.inner.timeout {
                info!(
                    "No requests for {}s, shutting down",
                    idle.as_secs()
                );
                self.inner.expired.store(true, Ordering::SeqCst);
                self.inner.shutdown.notify_waiters();
                return;
            }

            let remaining = self.inner.timeout - idle;
            debug!("Idle countdown: {}s remaining", remaining.as_secs());
            sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    /// Resolve once the countdown has fired. Safe to await before,
    /// during, or after expiry.
    pub async fn wait_for_shutdown(&self) {
        loop {
            if self.is_expired() {
                return;
            }
            self.inner.shutdown.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn expires_after_idle_timeout() {
        let governor = LifecycleGovernor::new(Duration::from_secs(60));
        let runner = governor.clone();
        tokio::spawn(async move { runner.run().await });

        advance(Duration::from_secs(59)).await;
        assert!(!governor.is_expired());

        advance(Duration::from_secs(2)).await;
        governor.wait_for_shutdown().await;
        assert!(governor.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_the_full_duration() {
        let governor = LifecycleGovernor::new(Duration::from_secs(60));
        let runner = governor.clone();
        tokio::spawn(async move { runner.run().await });

        advance(Duration::from_secs(45)).await;
        governor.touch();

        // Old deadline passes without firing
        advance(Duration::from_secs(30)).await;
        assert!(!governor.is_expired());

        // Full duration after the touch does fire
        advance(Duration::from_secs(31)).await;
        governor.wait_for_shutdown().await;
        assert!(governor.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_after_expiry_resolve_immediately() {
        let governor = LifecycleGovernor::new(Duration::from_millis(10));
        let runner = governor.clone();
        tokio::spawn(async move { runner.run().await });

        advance(Duration::from_millis(20)).await;
        governor.wait_for_shutdown().await;

        // A waiter registered after the fire must not hang
        governor.wait_for_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_touches_do_not_double_fire() {
        let governor = LifecycleGovernor::new(Duration::from_secs(10));
        let runner = governor.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        for _ in 0..5 {
            advance(Duration::from_secs(5)).await;
            governor.touch();
        }
        assert!(!governor.is_expired());

        advance(Duration::from_secs(11)).await;
        governor.wait_for_shutdown().await;

        // run() exits after the single fire
        handle.await.unwrap();
    }
}
