//! Burst collapsing for high-frequency events.
//!
//! Every call for a key cancels the pending timer for that key and starts a
//! new one, so only the last action of a burst runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::events::{EventKind, MonitoringEvent};

/// `(kind, participant, secondary)`. Progress for different steps or
/// participants never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub kind: EventKind,
    pub participant_id: String,
    pub secondary: String,
}

impl DebounceKey {
    pub fn of(event: &MonitoringEvent) -> Self {
        Self {
            kind: event.kind(),
            participant_id: event.participant_id().to_string(),
            secondary: event.secondary_key().to_string(),
        }
    }
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<DebounceKey, PendingTimer>,
    /// Actions whose timer fired but which have not finished yet
    running: usize,
}

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    match timers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Counts an action as running until it completes or its task is dropped.
struct RunningAction {
    timers: Arc<Mutex<Timers>>,
}

impl Drop for RunningAction {
    fn drop(&mut self) {
        let mut timers = lock(&self.timers);
        timers.running = timers.running.saturating_sub(1);
    }
}

/// Cancellable per-key timers.
#[derive(Clone, Default)]
pub struct DebounceRegistry {
    timers: Arc<Mutex<Timers>>,
}

impl DebounceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, unless another call for the same key
    /// arrives first.
    pub fn debounce<F>(&self, key: DebounceKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut timers = lock(&self.timers);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let registry = Arc::clone(&self.timers);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister before running so a later call starts a fresh timer
            // instead of aborting this action mid-flight. The action stays
            // counted in `pending()` until it finishes.
            let _running = {
                let mut timers = lock(&registry);
                match timers.pending.get(&timer_key) {
                    Some(pending) if pending.generation == generation => {
                        timers.pending.remove(&timer_key);
                        timers.running += 1;
                    }
                    _ => return,
                }
                RunningAction {
                    timers: Arc::clone(&registry),
                }
            };
            action.await;
        });

        if let Some(previous) = timers
            .pending
            .insert(key, PendingTimer { generation, handle })
        {
            previous.handle.abort();
        }
    }

    /// Timers still waiting plus actions that fired and have not finished.
    pub fn pending(&self) -> usize {
        let timers = lock(&self.timers);
        timers.pending.len() + timers.running
    }

    /// Abort every pending timer; their actions never run. Actions already
    /// running are left to finish.
    pub fn cancel_all(&self) {
        let mut timers = lock(&self.timers);
        for (_, pending) in timers.pending.drain() {
            pending.handle.abort();
        }
    }
}

impl std::fmt::Debug for DebounceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceRegistry")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key(secondary: &str) -> DebounceKey {
        DebounceKey {
            kind: EventKind::StepProgress,
            participant_id: "p".to_string(),
            secondary: secondary.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last_action() {
        let registry = DebounceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for value in [10, 11, 12] {
            let tx = tx.clone();
            registry.debounce(key("csat"), Duration::from_millis(500), async move {
                let _ = tx.send(value);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(registry.pending(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rx.recv().await, Some(12));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_collide() {
        let registry = DebounceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for step in ["csat", "nps"] {
            let tx = tx.clone();
            registry.debounce(key(step), Duration::from_millis(200), async move {
                let _ = tx.send(step);
            });
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort();
        assert_eq!(got, vec!["csat", "nps"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_pending_actions() {
        let registry = DebounceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        registry.debounce(key("csat"), Duration::from_millis(200), async move {
            let _ = tx.send(1);
        });
        registry.cancel_all();
        assert_eq!(registry.pending(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_action_counts_as_pending_until_done() {
        let registry = DebounceRegistry::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        registry.debounce(key("csat"), Duration::from_millis(100), async move {
            let _ = release_rx.await;
            let _ = done_tx.send(());
        });

        // Timer has fired; the action is parked on `release_rx`.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(done_rx.try_recv().is_err());
        assert_eq!(registry.pending(), 1);
        registry.cancel_all();
        assert_eq!(registry.pending(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(done_rx.recv().await, Some(()));
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.pending() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("running action never finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_restarts_on_each_call() {
        let registry = DebounceRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        registry.debounce(key("csat"), Duration::from_millis(300), async move {
            let _ = first.send("first");
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        registry.debounce(key("csat"), Duration::from_millis(300), async move {
            let _ = tx.send("second");
        });

        // 250ms after the second call: the original deadline has passed but
        // nothing fired.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.recv().await, Some("second"));
    }
}
