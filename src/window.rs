//! Coalesces endpoints ramping up around the same time into a shared tick
//! schedule.
//!
//! `WindowScheduler` is pure bookkeeping plus the tick/insertion algorithm;
//! it knows nothing about `RampExecutor` or `EndpointGroup`. The selector
//! (`selector::RampingUpSelector`) is the only thing that talks to the
//! executor — it asks the scheduler where (which `windowIndex`) and when
//! (`initial_delay_nanos`) to register a periodic task, then hands the
//! resulting `ScheduledHandle` back with `set_handle`. This mirrors the
//! repository's split between state (`balancer::manager::Endpoints`) and
//! the thing that drives it (`balancer::dispatcher::Dispatcher`).

use ordermap::OrderMap;

use endpoint::{Endpoint, EndpointKey};
use executor::ScheduledHandle;
use transition::Transition;

/// `floor((now mod interval) / window_task)`.
pub fn window_index(now_nanos: u64, interval_nanos: u64, window_task_nanos: u64) -> u64 {
    (now_nanos % interval_nanos) / window_task_nanos
}

/// Time until this window's next tick boundary inside the current period.
pub fn initial_delay_nanos(now_nanos: u64, interval_nanos: u64, window_task_nanos: u64) -> u64 {
    let w = window_index(now_nanos, interval_nanos, window_task_nanos);
    interval_nanos - (now_nanos % interval_nanos) + w * window_task_nanos
}

/// One ramping endpoint within a `WindowEntry`.
///
/// `step` ranges `1..=total_steps`; a member with `step > total_steps` has
/// graduated and is dropped from the window on the next tick.
#[derive(Clone, Debug)]
pub struct EndpointAndStep {
    pub endpoint: Endpoint,
    pub step: u32,
    pub current_weight: u32,
}

/// A bucket of endpoints sharing one periodic tick schedule.
pub struct WindowEntry {
    pub index: u64,
    pub members: Vec<EndpointAndStep>,
    handle: Option<ScheduledHandle>,
}

impl WindowEntry {
    fn new(index: u64) -> WindowEntry {
        WindowEntry {
            index,
            members: Vec::new(),
            handle: None,
        }
    }
}

/// What `tick` did to the fired window, so the caller knows whether to
/// leave the periodic handle running or drop its reference to it (the
/// handle itself is already cancelled by `tick` in the `Emptied` case).
#[derive(Debug, Eq, PartialEq)]
pub enum TickOutcome {
    StillActive,
    Emptied,
}

/// Owns every in-flight ramp-up window and the `step -> weight` function
/// applied to their members.
pub struct WindowScheduler<T> {
    interval_nanos: u64,
    window_task_nanos: u64,
    total_steps: u32,
    transition: T,
    entries: OrderMap<u64, WindowEntry>,
    window_of: OrderMap<EndpointKey, u64>,
}

impl<T: Transition> WindowScheduler<T> {
    pub fn new(interval_nanos: u64, window_task_nanos: u64, total_steps: u32, transition: T) -> WindowScheduler<T> {
        WindowScheduler {
            interval_nanos,
            window_task_nanos,
            total_steps,
            transition,
            entries: OrderMap::new(),
            window_of: OrderMap::new(),
        }
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn window_index_at(&self, now_nanos: u64) -> u64 {
        window_index(now_nanos, self.interval_nanos, self.window_task_nanos)
    }

    pub fn initial_delay_at(&self, now_nanos: u64) -> u64 {
        initial_delay_nanos(now_nanos, self.interval_nanos, self.window_task_nanos)
    }

    pub fn interval_nanos(&self) -> u64 {
        self.interval_nanos
    }

    /// Inserts `endpoint` at `step=1` into the window for `now_nanos`.
    ///
    /// Returns `(window_index, is_new_window)`. When `is_new_window` is
    /// `true`, the caller must register a periodic schedule (initial delay
    /// `initial_delay_at(now_nanos)`, period `interval_nanos()`) and pass
    /// the resulting handle to `set_handle`.
    pub fn insert(&mut self, now_nanos: u64, endpoint: Endpoint) -> (u64, bool) {
        let idx = self.window_index_at(now_nanos);
        let target_weight = endpoint.target_weight();
        let step = 1;
        let current_weight = self.transition.weight_at(step, self.total_steps, target_weight);
        let key = endpoint.key();

        let is_new = !self.entries.contains_key(&idx);
        let entry = self.entries.entry(idx).or_insert_with(|| WindowEntry::new(idx));
        entry.members.push(EndpointAndStep {
            endpoint,
            step,
            current_weight,
        });
        self.window_of.insert(key, idx);
        (idx, is_new)
    }

    /// Attaches the periodic handle to a freshly created window.
    pub fn set_handle(&mut self, window_index: u64, handle: ScheduledHandle) {
        if let Some(entry) = self.entries.get_mut(&window_index) {
            entry.handle = Some(handle);
        }
    }

    /// Whether `key` is currently ramping, and at what effective weight.
    pub fn current_weight_of(&self, key: &EndpointKey) -> Option<u32> {
        let idx = *self.window_of.get(key)?;
        let entry = self.entries.get(&idx)?;
        entry
            .members
            .iter()
            .find(|m| &m.endpoint.key() == key)
            .map(|m| m.current_weight)
    }

    pub fn is_ramping(&self, key: &EndpointKey) -> bool {
        self.window_of.contains_key(key)
    }

    /// Removes every member matching `key` from its window (there is at
    /// most one), cancelling the window's handle if it becomes empty.
    pub fn remove_endpoint(&mut self, key: &EndpointKey) {
        let idx = match self.window_of.remove(key) {
            Some(idx) => idx,
            None => return,
        };
        let emptied = {
            let entry = match self.entries.get_mut(&idx) {
                Some(e) => e,
                None => return,
            };
            entry.members.retain(|m| &m.endpoint.key() != key);
            entry.members.is_empty()
        };
        if emptied {
            self.drop_entry(idx);
        }
    }

    /// Advances every member of the window at `window_index` by one step.
    /// Members whose step exceeds `total_steps` graduate and are dropped;
    /// if that empties the window, its handle is cancelled and the entry
    /// removed.
    ///
    /// Returns the outcome alongside the number of members that graduated
    /// on this fire (`step` crossed `total_steps`), for callers that track
    /// a graduation counter.
    pub fn tick(&mut self, window_index: u64) -> (TickOutcome, usize) {
        let total_steps = self.total_steps;
        let transition = &self.transition;
        let (emptied, graduated) = match self.entries.get_mut(&window_index) {
            None => return (TickOutcome::Emptied, 0),
            Some(entry) => {
                for m in entry.members.iter_mut() {
                    m.step += 1;
                    m.current_weight = transition.weight_at(m.step, total_steps, m.endpoint.target_weight());
                }
                let graduated = entry.members.iter().filter(|m| m.step > total_steps).count();
                entry.members.retain(|m| m.step <= total_steps);
                (entry.members.is_empty(), graduated)
            }
        };
        if emptied {
            for m_key in self.keys_in(window_index) {
                self.window_of.remove(&m_key);
            }
            self.drop_entry(window_index);
            (TickOutcome::Emptied, graduated)
        } else {
            (TickOutcome::StillActive, graduated)
        }
    }

    fn keys_in(&self, window_index: u64) -> Vec<EndpointKey> {
        match self.entries.get(&window_index) {
            Some(entry) => entry.members.iter().map(|m| m.endpoint.key()).collect(),
            None => Vec::new(),
        }
    }

    fn drop_entry(&mut self, window_index: u64) {
        if let Some(entry) = self.entries.remove(&window_index) {
            if let Some(handle) = entry.handle {
                handle.cancel();
            }
        }
    }

    /// Every currently ramping member, across all windows, in unspecified
    /// order — used by the selector to rebuild the live view.
    pub fn all_members(&self) -> Vec<&EndpointAndStep> {
        self.entries.values().flat_map(|e| e.members.iter()).collect()
    }

    pub fn window_count(&self) -> usize {
        self.entries.len()
    }

    /// Cancels every handle exactly once and clears all state.
    pub fn close(&mut self) {
        for (_, entry) in self.entries.drain(..) {
            if let Some(handle) = entry.handle {
                handle.cancel();
            }
        }
        self.window_of.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endpoint::Endpoint;
    use transition::Linear;

    fn scheduler() -> WindowScheduler<Linear> {
        WindowScheduler::new(20_000_000_000, 1_000_000_000, 10, Linear::default())
    }

    #[test]
    fn window_index_table() {
        // interval=5s, windowTask=2s, totalSteps irrelevant here.
        assert_eq!(window_index(0, 5_000_000_000, 2_000_000_000), 0);
        assert_eq!(window_index(2_000_000_000 - 1, 5_000_000_000, 2_000_000_000), 0);
        assert_eq!(window_index(2_000_000_000, 5_000_000_000, 2_000_000_000), 1);
        assert_eq!(window_index(2_000_000_000 + 1, 5_000_000_000, 2_000_000_000), 1);
        assert_eq!(window_index(5_000_000_000 - 1, 5_000_000_000, 2_000_000_000), 2);
        assert_eq!(window_index(5_000_000_000, 5_000_000_000, 2_000_000_000), 0);
    }

    #[test]
    fn initial_delay_table() {
        let interval = 5_000_000_000u64;
        let window_task = 2_000_000_000u64;
        assert_eq!(initial_delay_nanos(0, interval, window_task), 5_000_000_000);
        assert_eq!(
            initial_delay_nanos(window_task - 1, interval, window_task),
            5_000_000_000 - (window_task - 1)
        );
        assert_eq!(initial_delay_nanos(window_task, interval, window_task), 5_000_000_000);
        assert_eq!(initial_delay_nanos(window_task + 1, interval, window_task), 5_000_000_000 - 1);
        assert_eq!(
            initial_delay_nanos(interval - 1, interval, window_task),
            window_task * 2 + 1
        );
        assert_eq!(initial_delay_nanos(interval, interval, window_task), 5_000_000_000);
    }

    #[test]
    fn coalescence_same_window() {
        let mut s = scheduler();
        let (w1, new1) = s.insert(0, Endpoint::new("bar.com", 1000));
        let (w2, new2) = s.insert(500_000_000, Endpoint::new("bar1.com", 1000));
        assert!(new1);
        assert!(!new2);
        assert_eq!(w1, w2);
        assert_eq!(s.window_count(), 1);
    }

    #[test]
    fn graduation_after_exactly_total_steps_ticks() {
        let mut s = scheduler();
        let (w, _) = s.insert(0, Endpoint::new("bar.com", 1000));
        assert_eq!(s.current_weight_of(&Endpoint::new("bar.com", 1000).key()), Some(100));
        for i in 1..10 {
            let (outcome, graduated) = s.tick(w);
            assert_eq!(outcome, TickOutcome::StillActive, "tick {}", i);
            assert_eq!(graduated, 0);
        }
        let (outcome, graduated) = s.tick(w);
        assert_eq!(outcome, TickOutcome::Emptied);
        assert_eq!(graduated, 1);
        assert_eq!(s.window_count(), 0);
    }

    #[test]
    fn remove_endpoint_drops_empty_window() {
        let mut s = scheduler();
        let ep = Endpoint::new("bar.com", 1000);
        let key = ep.key();
        s.insert(0, ep);
        assert!(s.is_ramping(&key));
        s.remove_endpoint(&key);
        assert!(!s.is_ramping(&key));
        assert_eq!(s.window_count(), 0);
    }

    #[test]
    fn duplicates_of_same_key_tracked_independently() {
        let mut s = scheduler();
        s.insert(0, Endpoint::new("bar.com", 1000));
        s.insert(10, Endpoint::new("bar.com", 1000));
        assert_eq!(s.all_members().len(), 2);
    }
}
