//! Polling supervisor: runs a named set of per-connection poll loops,
//! each sleeping for a freshly-resolved interval between ticks so a
//! runtime interval change takes effect on the next tick, and skipping
//! a tick outright (never queuing it) if the previous poll for that
//! loop is still running — overrun safety takes priority over cadence.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleetwatch_common::types::ConnectionId;
use fleetwatch_registry::{ConnectionRegistry, RegistryEvent};

pub type PollFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A single poll operation, invoked once per tick.
#[async_trait]
pub trait PollTask: Send + Sync {
    async fn poll(&self, connection_id: &ConnectionId);

    /// Called when the owning connection is removed from the
    /// registry, so the task can release any per-connection state
    /// (buffers, detector state, subscription caches). Default is a
    /// no-op for tasks that keep no such state.
    async fn on_connection_removed(&self, _connection_id: &ConnectionId) {}
}

struct LoopHandle {
    join: JoinHandle<()>,
    running: Arc<AtomicBool>,
    task: Arc<dyn PollTask>,
}

/// Resolves a loop's sleep duration fresh before every tick, per
/// spec.md §4.D ("`intervalFn` is resolved freshly before each tick so
/// settings may change at runtime").
pub type IntervalFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Registration for one named poll loop bound to one connection.
pub struct LoopSpec {
    pub name: String,
    pub connection_id: ConnectionId,
    pub interval_fn: IntervalFn,
    pub initial_poll: bool,
    pub task: Arc<dyn PollTask>,
}

/// Wrap a fixed `Duration` as an always-the-same `IntervalFn`, for
/// callers with no runtime-configurable interval to resolve.
pub fn fixed_interval(interval: Duration) -> IntervalFn {
    Arc::new(move || interval)
}

/// Owns every running poll loop, keyed by `(loop name, connection id)`.
pub struct PollingSupervisor {
    loops: RwLock<HashMap<(String, ConnectionId), LoopHandle>>,
    drain_timeout: Duration,
}

impl PollingSupervisor {
    pub fn new(drain_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            loops: RwLock::new(HashMap::new()),
            drain_timeout,
        })
    }

    /// Start a poll loop. If `initial_poll` is set, the task runs once
    /// immediately before the first tick instead of waiting a full
    /// interval. Re-registering a name that is already live is a no-op
    /// (programmer error, per spec) rather than a replacement.
    pub async fn start(&self, spec: LoopSpec) {
        let key = (spec.name.clone(), spec.connection_id.clone());
        if self.loops.read().await.contains_key(&key) {
            warn!(loop_name = %spec.name, connection_id = %spec.connection_id, "loop already registered, ignoring duplicate start");
            return;
        }
        let running = Arc::new(AtomicBool::new(false));
        let running_for_task = running.clone();
        let task = spec.task;
        let task_for_handle = task.clone();
        let connection_id = spec.connection_id.clone();
        let name = spec.name.clone();
        let interval_fn = spec.interval_fn;
        let initial_poll = spec.initial_poll;

        let join = tokio::spawn(async move {
            if initial_poll {
                run_once(&task, &connection_id, &name, &running_for_task).await;
            }

            loop {
                tokio::time::sleep(interval_fn()).await;
                run_once(&task, &connection_id, &name, &running_for_task).await;
            }
        });

        self.loops.write().await.insert(
            key,
            LoopHandle {
                join,
                running,
                task: task_for_handle,
            },
        );
    }

    /// Stop one named loop for one connection, aborting it if it
    /// doesn't finish its in-flight poll within the drain timeout.
    pub async fn stop(&self, name: &str, connection_id: &str) {
        let key = (name.to_string(), connection_id.to_string());
        let handle = self.loops.write().await.remove(&key);
        if let Some(handle) = handle {
            self.drain_or_abort(handle).await;
        }
    }

    /// Stop every loop, draining each with the configured timeout.
    pub async fn stop_all(&self) {
        let handles: Vec<LoopHandle> = self.loops.write().await.drain().map(|(_, v)| v).collect();
        for handle in handles {
            self.drain_or_abort(handle).await;
        }
    }

    async fn drain_or_abort(&self, handle: LoopHandle) {
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            if !handle.running.load(Ordering::SeqCst) {
                handle.join.abort();
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("poll loop did not drain within timeout, aborting in-flight poll");
                handle.join.abort();
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Wire registry removal events to automatically tear down every
    /// loop registered for that connection, regardless of loop name,
    /// invoking each loop's `onConnectionRemoved` hook so owners can
    /// release per-connection state (§4.D).
    pub fn watch_registry(self: &Arc<Self>, registry: Arc<ConnectionRegistry>) {
        let supervisor = self.clone();
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let RegistryEvent::Removed(connection_id) = event {
                    supervisor.remove_connection(&connection_id).await;
                }
            }
        });
    }

    /// Stop every loop owned by `connection_id` and notify each one's
    /// task via `on_connection_removed`.
    pub async fn remove_connection(&self, connection_id: &ConnectionId) {
        let keys: Vec<(String, ConnectionId)> = self
            .loops
            .read()
            .await
            .keys()
            .filter(|(_, conn)| conn == connection_id)
            .cloned()
            .collect();

        for (name, conn) in keys {
            if let Some(handle) = self.loops.write().await.remove(&(name, conn.clone())) {
                handle.task.on_connection_removed(&conn).await;
                self.drain_or_abort(handle).await;
            }
        }
    }

    pub async fn active_loop_count(&self) -> usize {
        self.loops.read().await.len()
    }
}

async fn run_once(task: &Arc<dyn PollTask>, connection_id: &ConnectionId, name: &str, running: &Arc<AtomicBool>) {
    if running.swap(true, Ordering::SeqCst) {
        metrics::counter!(fleetwatch_common::metrics::POLL_CYCLES_SKIPPED_TOTAL, "loop" => name.to_string()).increment(1);
        debug!(loop_name = name, connection_id = %connection_id, "previous poll still running, skipping tick");
        return;
    }
    metrics::counter!(fleetwatch_common::metrics::POLL_CYCLES_TOTAL, "loop" => name.to_string()).increment(1);
    task.poll(connection_id).await;
    running.store(false, Ordering::SeqCst);
}

/// Shared mutex-guarded poll task, for closures that need exclusive
/// access to captured state between ticks.
pub struct GuardedPollTask<F> {
    inner: Mutex<F>,
}

impl<F> GuardedPollTask<F>
where
    F: FnMut(&ConnectionId) -> PollFuture + Send + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(f) })
    }
}

#[async_trait]
impl<F> PollTask for GuardedPollTask<F>
where
    F: FnMut(&ConnectionId) -> PollFuture + Send + 'static,
{
    async fn poll(&self, connection_id: &ConnectionId) {
        let fut = {
            let mut guard = self.inner.lock().await;
            (guard)(connection_id)
        };
        fut.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc as StdArc;

    struct CountingTask {
        count: StdArc<AtomicU32>,
        hold_ms: u64,
    }

    #[async_trait]
    impl PollTask for CountingTask {
        async fn poll(&self, _connection_id: &ConnectionId) {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.hold_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.hold_ms)).await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interval_fn_is_reresolved_on_every_tick() {
        // Starts fast (10ms between ticks); once several ticks have
        // accumulated, the interval is switched to a long one on the
        // fly. If the supervisor captured the duration once at
        // `start()` instead of calling the closure fresh before every
        // tick (spec.md §4.D), the switch would never take effect and
        // ticks would keep arriving every 10ms regardless.
        let supervisor = PollingSupervisor::new(Duration::from_millis(200));
        let count = StdArc::new(AtomicU32::new(0));
        let fast = StdArc::new(std::sync::atomic::AtomicBool::new(true));
        let fast_for_fn = fast.clone();

        supervisor
            .start(LoopSpec {
                name: "metrics".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: Arc::new(move || {
                    if fast_for_fn.load(Ordering::SeqCst) {
                        Duration::from_millis(10)
                    } else {
                        Duration::from_secs(60)
                    }
                }),
                initial_poll: false,
                task: Arc::new(CountingTask { count: count.clone(), hold_ms: 0 }),
            })
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let before_switch = count.load(Ordering::SeqCst);
        assert!(before_switch >= 3, "expected several fast ticks, got {before_switch}");

        fast.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_switch = count.load(Ordering::SeqCst);
        supervisor.stop_all().await;

        assert!(
            after_switch <= before_switch + 1,
            "switching interval_fn to a long duration should stall further ticks, got {before_switch} -> {after_switch}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overrun_tick_is_skipped_not_queued() {
        let supervisor = PollingSupervisor::new(Duration::from_millis(200));
        let count = StdArc::new(AtomicU32::new(0));
        let task = Arc::new(CountingTask {
            count: count.clone(),
            hold_ms: 150,
        });

        supervisor
            .start(LoopSpec {
                name: "metrics".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(50)),
                initial_poll: true,
                task,
            })
            .await;

        tokio::time::sleep(Duration::from_millis(220)).await;
        supervisor.stop_all().await;

        let observed = count.load(Ordering::SeqCst);
        assert!(observed <= 3, "expected overrun ticks to be skipped, got {observed} polls");
    }

    #[tokio::test]
    async fn stop_all_clears_active_loops() {
        let supervisor = PollingSupervisor::new(Duration::from_millis(100));
        let count = StdArc::new(AtomicU32::new(0));
        let task = Arc::new(CountingTask { count, hold_ms: 0 });

        supervisor
            .start(LoopSpec {
                name: "metrics".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: true,
                task,
            })
            .await;

        assert_eq!(supervisor.active_loop_count().await, 1);
        supervisor.stop_all().await;
        assert_eq!(supervisor.active_loop_count().await, 0);
    }

    #[tokio::test]
    async fn reregistering_a_live_name_is_a_no_op() {
        let supervisor = PollingSupervisor::new(Duration::from_millis(100));
        let count_a = StdArc::new(AtomicU32::new(0));
        let count_b = StdArc::new(AtomicU32::new(0));

        supervisor
            .start(LoopSpec {
                name: "metrics".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: true,
                task: Arc::new(CountingTask { count: count_a.clone(), hold_ms: 0 }),
            })
            .await;
        supervisor
            .start(LoopSpec {
                name: "metrics".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: true,
                task: Arc::new(CountingTask { count: count_b.clone(), hold_ms: 0 }),
            })
            .await;

        assert_eq!(supervisor.active_loop_count().await, 1);
        assert_eq!(count_a.load(Ordering::SeqCst), 1, "original loop keeps running");
        assert_eq!(count_b.load(Ordering::SeqCst), 0, "duplicate registration never started");
    }

    struct HookTask {
        removed: StdArc<AtomicU32>,
    }

    #[async_trait]
    impl PollTask for HookTask {
        async fn poll(&self, _connection_id: &ConnectionId) {}

        async fn on_connection_removed(&self, _connection_id: &ConnectionId) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn remove_connection_invokes_hook_and_stops_every_loop_for_it() {
        let supervisor = PollingSupervisor::new(Duration::from_millis(100));
        let removed = StdArc::new(AtomicU32::new(0));

        supervisor
            .start(LoopSpec {
                name: "anomaly".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: false,
                task: Arc::new(HookTask { removed: removed.clone() }),
            })
            .await;
        supervisor
            .start(LoopSpec {
                name: "audit".to_string(),
                connection_id: "conn-a".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: false,
                task: Arc::new(HookTask { removed: removed.clone() }),
            })
            .await;
        supervisor
            .start(LoopSpec {
                name: "anomaly".to_string(),
                connection_id: "conn-b".to_string(),
                interval_fn: fixed_interval(Duration::from_millis(500)),
                initial_poll: false,
                task: Arc::new(HookTask { removed: removed.clone() }),
            })
            .await;

        supervisor.remove_connection(&"conn-a".to_string()).await;

        assert_eq!(removed.load(Ordering::SeqCst), 2, "both conn-a loops should be hooked");
        assert_eq!(supervisor.active_loop_count().await, 1, "conn-b loop should remain");
    }
}
