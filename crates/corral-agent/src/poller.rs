//! Debounced poller
//!
//! One state machine shared by everything that tracks a discovery-store
//! prefix: poll at a fixed interval, treat any difference from the last
//! applied snapshot as a candidate change, and apply only once the
//! snapshot has been quiet for a full settle window. Bursts of changes
//! collapse into a single apply of the last snapshot observed.
//!
//! States: Idle -(change)-> Pending -(another change)-> Pending(reset)
//! -(window elapses)-> Applying -(done)-> Idle. The loop never
//! terminates on error; fetch failures are logged and the next tick
//! retries.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use corral_core::StoreError;

/// Fixed-interval poll with a settle window.
#[derive(Debug, Clone)]
pub struct DebouncedPoller {
    poll_interval: Duration,
    settle_window: Duration,
}

impl DebouncedPoller {
    pub fn new(poll_interval: Duration, settle_window: Duration) -> Self {
        Self {
            poll_interval,
            settle_window,
        }
    }

    /// Run until cancelled.
    ///
    /// `fetch` produces the current snapshot; `apply` consumes a settled
    /// one and reports whether it took effect. When `apply` returns
    /// `false` the comparison baseline is not advanced, so the next poll
    /// re-candidates the same snapshot and the apply is retried after a
    /// fresh settle window.
    ///
    /// Applies never overlap: the timer is only re-armed by polls, and
    /// polling resumes only after `apply` returns.
    pub async fn run<T, FetchFn, FetchFut, ApplyFn, ApplyFut>(
        &self,
        mut fetch: FetchFn,
        mut apply: ApplyFn,
        cancel: CancellationToken,
    ) where
        T: Clone + Eq + Send,
        FetchFn: FnMut() -> FetchFut,
        FetchFut: Future<Output = Result<T, StoreError>>,
        ApplyFn: FnMut(T) -> ApplyFut,
        ApplyFut: Future<Output = bool>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut applied: Option<T> = None;
        let mut pending: Option<T> = None;
        let mut settle_at: Option<Instant> = None;

        loop {
            let deadline = settle_at;
            let settle = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("poller stopped");
                    return;
                }

                _ = ticker.tick() => {
                    let snapshot = match fetch().await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            warn!(error = %e, "fetch failed, retrying on next poll");
                            continue;
                        }
                    };

                    if applied.as_ref() == Some(&snapshot) {
                        // Settled back to the applied state; any burst
                        // in between amounted to nothing.
                        if pending.take().is_some() {
                            debug!("state returned to last applied snapshot");
                            settle_at = None;
                        }
                    } else if pending.as_ref() != Some(&snapshot) {
                        if pending.is_some() {
                            warn!("not settled, changed again before the settle window elapsed");
                        }
                        pending = Some(snapshot);
                        settle_at = Some(Instant::now() + self.settle_window);
                    }
                }

                _ = settle => {
                    settle_at = None;
                    if let Some(snapshot) = pending.take() {
                        debug!("settle window elapsed, applying snapshot");
                        if apply(snapshot.clone()).await {
                            applied = Some(snapshot);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Fetch/apply harness over a mutable source value.
    struct Harness {
        source: Arc<Mutex<Result<Vec<String>, ()>>>,
        applies: Arc<Mutex<Vec<Vec<String>>>>,
        apply_ok: Arc<Mutex<bool>>,
    }

    impl Harness {
        fn new(initial: Vec<String>) -> Self {
            Self {
                source: Arc::new(Mutex::new(Ok(initial))),
                applies: Arc::new(Mutex::new(Vec::new())),
                apply_ok: Arc::new(Mutex::new(true)),
            }
        }

        fn set(&self, value: Vec<String>) {
            *self.source.lock().unwrap() = Ok(value);
        }

        fn fail(&self) {
            *self.source.lock().unwrap() = Err(());
        }

        fn reject_applies(&self) {
            *self.apply_ok.lock().unwrap() = false;
        }

        fn accept_applies(&self) {
            *self.apply_ok.lock().unwrap() = true;
        }

        async fn spawn(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
            let poller = DebouncedPoller::new(Duration::from_secs(5), Duration::from_secs(10));
            let source = self.source.clone();
            let applies = self.applies.clone();
            let apply_ok = self.apply_ok.clone();
            let task = tokio::spawn(async move {
                poller
                    .run(
                        move || {
                            let source = source.clone();
                            async move {
                                source
                                    .lock()
                                    .unwrap()
                                    .clone()
                                    .map_err(|()| StoreError::Transport("injected".into()))
                            }
                        },
                        move |snapshot| {
                            let applies = applies.clone();
                            let apply_ok = apply_ok.clone();
                            async move {
                                applies.lock().unwrap().push(snapshot);
                                *apply_ok.lock().unwrap()
                            }
                        },
                        cancel,
                    )
                    .await;
            });
            // Let the loop reach its first tick before the clock moves.
            tokio::task::yield_now().await;
            task
        }

        fn applied(&self) -> Vec<Vec<String>> {
            self.applies.lock().unwrap().clone()
        }
    }

    /// Advance paused time one second at a time so timers fire in
    /// deadline order rather than all at once.
    async fn advance(duration: Duration) {
        for _ in 0..duration.as_secs() {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_applies_once_with_last_snapshot() {
        let harness = Harness::new(vec!["a".into()]);
        let cancel = CancellationToken::new();
        let task = harness.spawn(cancel.clone()).await;

        // t=0 sees "a" as a candidate; two more changes land within the
        // settle window, each observed by a poll before the window
        // elapses and each resetting it.
        advance(Duration::from_secs(2)).await;
        harness.set(vec!["a".into(), "b".into()]);
        advance(Duration::from_secs(5)).await;
        harness.set(vec!["a".into(), "b".into(), "c".into()]);
        advance(Duration::from_secs(5)).await;

        // Quiet from here; the window elapses once.
        advance(Duration::from_secs(30)).await;

        let applies = harness.applied();
        assert_eq!(applies.len(), 1);
        assert_eq!(applies[0], vec!["a", "b", "c"]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_snapshot_never_applies_twice() {
        let harness = Harness::new(vec!["a".into()]);
        let cancel = CancellationToken::new();
        let task = harness.spawn(cancel.clone()).await;

        advance(Duration::from_secs(60)).await;
        assert_eq!(harness.applied().len(), 1);

        advance(Duration::from_secs(120)).await;
        assert_eq!(harness.applied().len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_do_not_kill_the_loop() {
        let harness = Harness::new(vec!["a".into()]);
        harness.fail();
        let cancel = CancellationToken::new();
        let task = harness.spawn(cancel.clone()).await;

        advance(Duration::from_secs(30)).await;
        assert!(harness.applied().is_empty());

        harness.set(vec!["a".into()]);
        advance(Duration::from_secs(30)).await;
        assert_eq!(harness.applied().len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_apply_is_retried_after_a_fresh_settle_window() {
        let harness = Harness::new(vec!["a".into()]);
        harness.reject_applies();
        let cancel = CancellationToken::new();
        let task = harness.spawn(cancel.clone()).await;

        // First settle: apply runs and reports failure, so the
        // baseline must not advance.
        advance(Duration::from_secs(12)).await;
        assert_eq!(harness.applied(), vec![vec!["a".to_string()]]);

        // Same snapshot is re-candidated and applied once more.
        harness.accept_applies();
        advance(Duration::from_secs(30)).await;
        assert_eq!(
            harness.applied(),
            vec![vec!["a".to_string()], vec!["a".to_string()]]
        );

        // Baseline advanced this time; nothing further applies.
        advance(Duration::from_secs(60)).await;
        assert_eq!(harness.applied().len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn change_reverted_within_window_applies_nothing_new() {
        let harness = Harness::new(vec!["a".into()]);
        let cancel = CancellationToken::new();
        let task = harness.spawn(cancel.clone()).await;

        // Let "a" apply.
        advance(Duration::from_secs(30)).await;
        assert_eq!(harness.applied().len(), 1);

        // Flap to "b" and back before the window elapses.
        harness.set(vec!["b".into()]);
        advance(Duration::from_secs(5)).await;
        harness.set(vec!["a".into()]);
        advance(Duration::from_secs(60)).await;

        assert_eq!(harness.applied().len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
