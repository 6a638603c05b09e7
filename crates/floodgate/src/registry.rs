use crate::metrics::{counters, gauges};
use crate::throttle::Throttle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Untouched sources older than this are forgotten by the sweep.
pub const IDLE_EXPIRY: Duration = Duration::from_secs(15 * 60);
/// Period of the background expiry sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

const INITIAL_CAPACITY: usize = 64;

/// Source → [`Throttle`] table.
///
/// The map lock only covers lookup, insert, delete and replacement. Charging
/// a source goes through the throttle's own lock, so unrelated sources are
/// accounted in parallel.
#[derive(Debug)]
pub struct Registry {
    throttles: Mutex<HashMap<String, Arc<Throttle>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            throttles: Mutex::new(HashMap::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Returns the throttle for `id`, creating it with full credit if absent.
    ///
    /// A live `id` always maps to the same throttle instance.
    pub fn get_or_create(&self, id: &str) -> Arc<Throttle> {
        let mut throttles = self.throttles.lock();
        if let Some(throttle) = throttles.get(id) {
            return Arc::clone(throttle);
        }
        let throttle = Arc::new(Throttle::new());
        throttles.insert(id.to_owned(), Arc::clone(&throttle));
        gauges::set_tracked_sources(throttles.len());
        throttle
    }

    /// Returns `true` if `id` is currently tracked.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.throttles.lock().contains_key(id)
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.throttles.lock().len()
    }

    /// Returns `true` if no source is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.throttles.lock().is_empty()
    }

    /// Forgets every source at once. Only for resetting between tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn clear_all(&self) {
        *self.throttles.lock() = HashMap::with_capacity(INITIAL_CAPACITY);
        gauges::set_tracked_sources(0);
    }

    /// Removes sources whose schedule trails `now` by more than `idle`.
    ///
    /// Returns the number of sources removed.
    pub fn sweep_expired(&self, now: Instant, idle: Duration) -> usize {
        let mut throttles = self.throttles.lock();
        let before = throttles.len();
        throttles.retain(|_, throttle| !throttle.is_idle_at(now, idle));
        gauges::set_tracked_sources(throttles.len());
        before - throttles.len()
    }

    /// Spawns the periodic expiry sweep.
    ///
    /// The first sweep runs one `period` after spawning. The task stops when
    /// `shutdown` fires or its sender is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        idle: Duration,
        mut shutdown: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.sweep_expired(Instant::now(), idle);
                        counters::sweep_removed_total(removed);
                        if removed > 0 {
                            debug!(removed, remaining = registry.len(), "expired idle sources");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("expiry sweep stopping");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
