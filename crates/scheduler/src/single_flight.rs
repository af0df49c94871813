//! Single-flight deduplication of concurrent work.
//!
//! While a computation for a key is running, further requests for the same
//! key block and receive a clone of its result instead of starting their own.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
enum SlotState<V> {
    Pending,
    Done(V),
    /// The leader unwound before producing a value.
    Abandoned,
}

#[derive(Debug)]
struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self { state: Mutex::new(SlotState::Pending), ready: Condvar::new() }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, state: SlotState<V>) {
        *self.lock() = state;
        self.ready.notify_all();
    }
}

/// How a call to [`SingleFlight::run`] obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// This caller ran the computation.
    Leader,
    /// Another caller was already running it; this one waited.
    Follower,
}

/// Pending-request set keyed by `K`.
///
/// # Example
///
/// ```
/// use shelf_scheduler::{FlightRole, SingleFlight};
///
/// let flights: SingleFlight<u32, String> = SingleFlight::new();
/// let (value, role) = flights.run(7, || "rendered".to_owned());
///
/// assert_eq!(value, "rendered");
/// assert_eq!(role, FlightRole::Leader);
/// assert!(!flights.is_pending(&7));
/// ```
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    pending: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<Slot<V>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `work` for `key` unless a run for the same key is already in
    /// progress, in which case this call waits for that run's result.
    ///
    /// If the running caller unwinds, waiting callers run `work` themselves.
    pub fn run<F>(&self, key: K, work: F) -> (V, FlightRole)
    where
        F: FnOnce() -> V,
    {
        let (slot, leader) = {
            let mut pending = self.lock();
            match pending.get(&key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    pending.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            let mut state = slot.lock();
            loop {
                match &*state {
                    SlotState::Done(value) => return (value.clone(), FlightRole::Follower),
                    SlotState::Abandoned => break,
                    SlotState::Pending => {
                        state = slot.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
            drop(state);
            return (work(), FlightRole::Follower);
        }

        let mut guard = LeaderGuard { flights: self, key: Some(key), slot: &slot };
        let value = work();
        guard.complete(value.clone());

        (value, FlightRole::Leader)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the pending entry when the leader finishes, or marks the slot
/// abandoned if the leader unwinds first.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    flights: &'a SingleFlight<K, V>,
    key: Option<K>,
    slot: &'a Arc<Slot<V>>,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn complete(&mut self, value: V) {
        if let Some(key) = self.key.take() {
            self.flights.lock().remove(&key);
        }
        self.slot.finish(SlotState::Done(value));
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights.lock().remove(&key);
            self.slot.finish(SlotState::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sequential_calls_each_run() {
        let flights: SingleFlight<&str, u32> = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let (_, role) = flights.run("k", || calls.fetch_add(1, Ordering::SeqCst) as u32);
            assert_eq!(role, FlightRole::Leader);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(flights.pending_count(), 0);
    }

    #[test]
    fn concurrent_calls_share_one_run() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let calls = AtomicUsize::new(0);
        let started = Barrier::new(2);

        let results: Vec<(u32, FlightRole)> = thread::scope(|scope| {
            let leader = scope.spawn(|| {
                flights.run(1, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
            });

            started.wait();
            let follower = scope.spawn(|| flights.run(1, || unreachable!("deduplicated")));

            vec![leader.join().unwrap(), follower.join().unwrap()]
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results[0], (42, FlightRole::Leader));
        assert_eq!(results[1], (42, FlightRole::Follower));
    }

    #[test]
    fn different_keys_do_not_wait_on_each_other() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();

        let (a, _) = flights.run(1, || flights.run(2, || 5).0 + 1);

        assert_eq!(a, 6);
    }

    #[test]
    fn abandoned_run_lets_followers_retry() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            flights.run(1, || panic!("render blew up"))
        }));
        assert!(outcome.is_err());
        assert!(!flights.is_pending(&1));

        let (value, role) = flights.run(1, || 3);
        assert_eq!((value, role), (3, FlightRole::Leader));
    }
}
