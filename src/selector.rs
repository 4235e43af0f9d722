//! The public face: reacts to endpoint-set changes published by an
//! `EndpointGroup`, drives ramp-up through a `WindowScheduler`, and answers
//! `select_now` from a `WeightedRandomDistribution` rebuilt on every change.
//!
//! Mirrors the repository's `balancer::manager`/`balancer::dispatcher`
//! split: `Inner` owns all mutable state and is only ever touched from
//! closures run through the `RampExecutor`; `RampingUpSelector` is the
//! cheaply cloneable handle a consumer holds.

use ordermap::OrderMap;
use rand;
use std::cell::RefCell;
use std::rc::Rc;
use tacho;

use config::RampingUpStrategyParams;
use distribution::WeightedRandomDistribution;
use endpoint::{Endpoint, EndpointKey};
use executor::{duration_from_nanos, RampExecutor};
use executor::Ticker;
use group::{EndpointGroup, ListenerId};
use metrics::Metrics;
use transition::Transition;
use window::WindowScheduler;

/// The rebuilt selection structure published on every live-view change.
struct Live {
    distribution: WeightedRandomDistribution<Endpoint>,
}

struct Inner {
    group: Rc<EndpointGroup>,
    executor: Rc<RampExecutor>,
    ticker: Rc<Ticker>,
    windows: WindowScheduler<Rc<Transition>>,
    live: Option<Live>,
    /// The most recently published list, duplicates and all. This is the
    /// authoritative membership for a live-view rebuild: the published
    /// `Live` distribution itself drops zero-weight entries (see
    /// `distribution::WeightedRandomDistribution::new`), so a tick that
    /// advances an endpoint from weight 0 to a positive weight must
    /// rebuild from this list, not from the distribution it is about to
    /// replace.
    published: Vec<Endpoint>,
    /// The target weight last observed for each live key, used to tell a
    /// genuine upgrade (target changed) from a still-ramping endpoint whose
    /// target has not moved since its last publish.
    target_weights: OrderMap<EndpointKey, u32>,
    /// The creation timestamp recorded for each live key, either assigned
    /// on first observation or supplied by the producer.
    created_at: OrderMap<EndpointKey, u64>,
    listener_id: Option<ListenerId>,
    bootstrapped: bool,
    closed: bool,
    metrics: Metrics,
}

/// A weight ramping-up endpoint selector bound to one `EndpointGroup`.
///
/// Cloning shares the same underlying state; every clone sees the same
/// live view and the same schedule.
#[derive(Clone)]
pub struct RampingUpSelector {
    inner: Rc<RefCell<Inner>>,
}

impl RampingUpSelector {
    /// Binds a new selector to `group`, driving its schedule through
    /// `executor` and timestamping with `ticker`. `params` must already be
    /// validated (see `RampingUpStrategyConfig::build`).
    pub fn new(
        group: Rc<EndpointGroup>,
        executor: Rc<RampExecutor>,
        ticker: Rc<Ticker>,
        params: RampingUpStrategyParams,
        metrics_scope: &tacho::Scope,
    ) -> RampingUpSelector {
        let transition: Rc<Transition> = Rc::from(params.transition);
        let windows = WindowScheduler::new(
            params.ramping_up_interval_nanos,
            params.ramping_up_task_window_nanos,
            params.total_steps,
            transition,
        );

        let inner = Rc::new(RefCell::new(Inner {
            group: group.clone(),
            executor: executor.clone(),
            ticker,
            windows,
            live: None,
            published: Vec::new(),
            target_weights: OrderMap::new(),
            created_at: OrderMap::new(),
            listener_id: None,
            bootstrapped: false,
            closed: false,
            metrics: Metrics::new(metrics_scope),
        }));

        let listener_inner = inner.clone();
        let listener_executor = executor.clone();
        let listener_id = group.add_listener(Box::new(move |list: &[Endpoint]| {
            let list = list.to_vec();
            let task_inner = listener_inner.clone();
            listener_executor.execute(Box::new(move || {
                Inner::on_endpoints_changed(&task_inner, list);
            }));
        }));
        inner.borrow_mut().listener_id = Some(listener_id);

        if group.is_ready() {
            let list = group.current_endpoints();
            let task_inner = inner.clone();
            executor.execute(Box::new(move || {
                Inner::on_endpoints_changed(&task_inner, list);
            }));
        }

        RampingUpSelector { inner }
    }

    /// Returns an endpoint chosen with probability proportional to its
    /// current effective weight, or `None` if the group has not yet
    /// published a list. Never blocks.
    pub fn select_now(&self) -> Option<Endpoint> {
        self.select_now_with(&mut rand::thread_rng())
    }

    /// As `select_now`, but draws from a caller-supplied `Rng` so tests can
    /// pass a seeded generator for deterministic sampling.
    pub fn select_now_with<R: rand::Rng>(&self, rng: &mut R) -> Option<Endpoint> {
        let inner = self.inner.borrow();
        inner.live.as_ref().and_then(|live| live.distribution.pick(rng).cloned())
    }

    /// Idempotent: cancels every scheduled handle and unregisters from the
    /// `EndpointGroup`.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.windows.close();
        if let Some(id) = inner.listener_id.take() {
            let group = inner.group.clone();
            drop(inner);
            group.remove_listener(id);
        }
    }

    /// Records an upstream failure observed by the caller (its
    /// `EndpointGroup` wiring detected an error from the discovery
    /// mechanism) without disturbing the live view, and increments the
    /// `upstream_failures` counter.
    pub fn note_upstream_failure(&self) {
        warn!("endpoint group upstream failure; retaining last known live view");
        self.inner.borrow_mut().metrics.upstream_failures.incr(1);
    }

    /// Number of windows currently advancing ramp-up schedules.
    pub fn windows_active(&self) -> usize {
        self.inner.borrow().windows.window_count()
    }
}

impl Inner {
    fn on_endpoints_changed(inner: &Rc<RefCell<Inner>>, new_list: Vec<Endpoint>) {
        if inner.borrow().closed {
            return;
        }

        let now_nanos = inner.borrow().ticker.now_nanos();
        let is_bootstrap = !inner.borrow().bootstrapped;

        // Distinct keys in the new list, first occurrence wins for
        // bookkeeping purposes (ramp state is tracked per key, not per
        // occurrence; duplicates are preserved only in the live view).
        let mut distinct: OrderMap<EndpointKey, Endpoint> = OrderMap::new();
        for ep in &new_list {
            distinct.entry(ep.key()).or_insert_with(|| ep.clone());
        }

        // Removals: keys previously live but absent from the new list.
        let previous_keys: Vec<EndpointKey> = inner.borrow().target_weights.keys().cloned().collect();
        for key in previous_keys {
            if !distinct.contains_key(&key) {
                let mut inner_mut = inner.borrow_mut();
                inner_mut.windows.remove_endpoint(&key);
                inner_mut.target_weights.remove(&key);
                inner_mut.created_at.remove(&key);
            }
        }

        if is_bootstrap {
            debug!("initial publish: {} endpoints admitted at full weight", distinct.len());
            // The very first publish this selector has ever observed is
            // admitted entirely at full weight: there is nothing to ramp
            // from yet.
            for (key, ep) in &distinct {
                let mut inner_mut = inner.borrow_mut();
                inner_mut.target_weights.insert(key.clone(), ep.target_weight());
                let created = ep.created_at_nanos().unwrap_or(now_nanos);
                inner_mut.created_at.insert(key.clone(), created);
            }
            inner.borrow_mut().bootstrapped = true;
        } else {
            for (key, ep) in &distinct {
                Inner::reconcile_one(inner, key, ep, now_nanos);
            }
        }

        Inner::rebuild_live(inner, &new_list);
    }

    /// Applies steps 2-4 of the change algorithm to a single key that is
    /// present in the new list (not the bootstrap case).
    fn reconcile_one(inner: &Rc<RefCell<Inner>>, key: &EndpointKey, ep: &Endpoint, now_nanos: u64) {
        let new_target = ep.target_weight();

        let (was_known, old_target, is_ramping, current_effective, recorded_created_at) = {
            let inner_ref = inner.borrow();
            let was_known = inner_ref.target_weights.contains_key(key);
            let old_target = inner_ref.target_weights.get(key).cloned();
            let is_ramping = inner_ref.windows.is_ramping(key);
            let current_effective = if is_ramping {
                inner_ref.windows.current_weight_of(key).unwrap_or(0)
            } else {
                old_target.unwrap_or(0)
            };
            let recorded_created_at = inner_ref.created_at.get(key).cloned();
            (was_known, old_target, is_ramping, current_effective, recorded_created_at)
        };

        let restarted_by_timestamp = match (ep.created_at_nanos(), recorded_created_at) {
            (Some(claimed), Some(recorded)) => claimed > recorded,
            (Some(_), None) => false,
            _ => false,
        };

        if restarted_by_timestamp {
            debug!("{}: newer createdAt observed, restarting ramp-up", key);
            let mut inner_mut = inner.borrow_mut();
            inner_mut.windows.remove_endpoint(key);
            inner_mut.created_at.insert(key.clone(), ep.created_at_nanos().unwrap());
            inner_mut.target_weights.insert(key.clone(), new_target);
            inner_mut.metrics.restarts_on_timestamp.incr(1);
            drop(inner_mut);
            Inner::insert_into_window(inner, ep.clone(), now_nanos);
            return;
        }

        if !was_known {
            debug!("{}: new endpoint, starting ramp-up toward {}", key, new_target);
            let created = ep.created_at_nanos().unwrap_or(now_nanos);
            let mut inner_mut = inner.borrow_mut();
            inner_mut.created_at.insert(key.clone(), created);
            inner_mut.target_weights.insert(key.clone(), new_target);
            drop(inner_mut);
            Inner::insert_into_window(inner, ep.clone(), now_nanos);
            return;
        }

        if new_target <= current_effective {
            // Downgrade (or unchanged weight): admitted immediately,
            // bypassing ramp-up entirely.
            let mut inner_mut = inner.borrow_mut();
            inner_mut.windows.remove_endpoint(key);
            inner_mut.target_weights.insert(key.clone(), new_target);
            return;
        }

        let genuine_upgrade = old_target.map(|w| w != new_target).unwrap_or(true);
        if genuine_upgrade {
            let mut inner_mut = inner.borrow_mut();
            inner_mut.windows.remove_endpoint(key);
            inner_mut.target_weights.insert(key.clone(), new_target);
            drop(inner_mut);
            Inner::insert_into_window(inner, ep.clone(), now_nanos);
        } else {
            // Still ramping toward the same target it was last publish;
            // leave its existing schedule alone.
            inner.borrow_mut().target_weights.insert(key.clone(), new_target);
        }
    }

    fn insert_into_window(inner: &Rc<RefCell<Inner>>, endpoint: Endpoint, now_nanos: u64) {
        let (window_index, is_new) = inner.borrow_mut().windows.insert(now_nanos, endpoint);
        inner.borrow_mut().metrics.ramp_starts.incr(1);
        if is_new {
            Inner::schedule_window(inner, window_index, now_nanos);
        }
    }

    fn schedule_window(inner: &Rc<RefCell<Inner>>, window_index: u64, now_nanos: u64) {
        let (initial_delay_nanos, period_nanos, executor) = {
            let inner_ref = inner.borrow();
            (
                inner_ref.windows.initial_delay_at(now_nanos),
                inner_ref.windows.interval_nanos(),
                inner_ref.executor.clone(),
            )
        };
        let tick_inner = inner.clone();
        let handle = executor.schedule_at_fixed_rate(
            duration_from_nanos(initial_delay_nanos),
            duration_from_nanos(period_nanos),
            Box::new(move || {
                Inner::on_tick(&tick_inner, window_index);
            }),
        );
        inner.borrow_mut().windows.set_handle(window_index, handle);
    }

    fn on_tick(inner: &Rc<RefCell<Inner>>, window_index: u64) {
        let graduated = {
            let mut inner_mut = inner.borrow_mut();
            if inner_mut.closed {
                return;
            }
            let (_outcome, graduated) = inner_mut.windows.tick(window_index);
            graduated
        };
        trace!("window {} ticked, {} graduated", window_index, graduated);
        if graduated > 0 {
            inner.borrow_mut().metrics.graduations.incr(graduated);
        }
        let list: Vec<Endpoint> = {
            let inner_ref = inner.borrow();
            // The tick only advances steps; the published set of keys does
            // not change, so the last published list stays the
            // authoritative membership. Rebuilding from `live` instead
            // would silently drop any endpoint whose effective weight was
            // 0 before this tick (`WeightedRandomDistribution::new` omits
            // zero-weight entries), losing it from the live view forever.
            inner_ref.published.clone()
        };
        Inner::rebuild_live(inner, &list);
    }

    /// Rebuilds the published live view from `new_list`, pulling each
    /// occurrence's effective weight from the window scheduler if it is
    /// ramping, or its own published target weight otherwise.
    fn rebuild_live(inner: &Rc<RefCell<Inner>>, new_list: &[Endpoint]) {
        let mut inner_mut = inner.borrow_mut();
        let mut entries = Vec::with_capacity(new_list.len());
        for ep in new_list {
            let key = ep.key();
            let weight = if inner_mut.windows.is_ramping(&key) {
                inner_mut.windows.current_weight_of(&key).unwrap_or(0)
            } else {
                ep.target_weight()
            };
            entries.push((ep.clone(), weight));
        }
        let distribution = WeightedRandomDistribution::new(entries);
        inner_mut.metrics.live_endpoints.set(new_list.len());
        inner_mut.metrics.windows_active.set(inner_mut.windows.window_count());
        inner_mut.metrics.ramping_endpoints.set(inner_mut.windows.all_members().len());
        inner_mut.live = Some(Live { distribution });
        inner_mut.published = new_list.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::RampingUpStrategyConfig;
    use executor::{ManualExecutor, ManualTicker};
    use group;
    use tacho::Tacho;

    fn params(interval_ms: u64, total_steps: u32, window_ms: u64) -> RampingUpStrategyParams {
        RampingUpStrategyConfig {
            ramping_up_interval_ms: Some(interval_ms),
            total_steps: Some(total_steps),
            ramping_up_task_window_ms: Some(window_ms),
            transition: None,
        }.build()
            .unwrap()
    }

    fn new_selector(
        exec: &ManualExecutor,
        ticker: &ManualTicker,
    ) -> (RampingUpSelector, group::EndpointPublisher) {
        let (group, publisher) = group::new();
        let Tacho { metrics, aggregator, report } = Tacho::default();
        drop(aggregator);
        drop(report);
        let selector = RampingUpSelector::new(
            Rc::new(group),
            Rc::new(exec.clone()),
            Rc::new(ticker.clone()),
            params(20_000, 10, 1_000),
            &metrics,
        );
        (selector, publisher)
    }

    #[test]
    fn not_ready_returns_none() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, _publisher) = new_selector(&exec, &ticker);
        assert_eq!(selector.select_now(), None);
    }

    #[test]
    fn s1_initial_publish_is_full_weight_no_ramp() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000), Endpoint::new("foo1.com", 1000)]);
        assert_eq!(selector.windows_active(), 0);

        ticker.advance(500_000_000);
        publisher.publish(vec![
            Endpoint::new("foo.com", 1000),
            Endpoint::new("foo1.com", 1000),
            Endpoint::new("bar.com", 1000),
        ]);
        assert_eq!(selector.windows_active(), 1);
        let weight_of = |name: &str| {
            let inner = selector.inner.borrow();
            inner
                .live
                .as_ref()
                .unwrap()
                .distribution
                .iter()
                .find(|&&(ref ep, _)| ep.authority().as_str() == name)
                .map(|&(_, w)| w)
        };
        assert_eq!(weight_of("foo.com"), Some(1000));
        assert_eq!(weight_of("bar.com"), Some(100));
    }

    #[test]
    fn s3_graduates_after_total_steps_ticks() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000)]);
        ticker.advance(500_000_000);
        publisher.publish(vec![Endpoint::new("foo.com", 1000), Endpoint::new("bar.com", 1000)]);
        assert_eq!(selector.windows_active(), 1);

        for _ in 0..10 {
            exec.fire_all();
        }
        assert_eq!(selector.windows_active(), 0);

        let weight_of = |name: &str| {
            let inner = selector.inner.borrow();
            inner
                .live
                .as_ref()
                .unwrap()
                .distribution
                .iter()
                .find(|&&(ref ep, _)| ep.authority().as_str() == name)
                .map(|&(_, w)| w)
        };
        assert_eq!(weight_of("bar.com"), Some(1000));
    }

    #[test]
    fn s5_downgrade_bypasses_ramp_without_disturbing_others() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000)]);
        ticker.advance(500_000_000);
        publisher.publish(vec![
            Endpoint::new("foo.com", 1000),
            Endpoint::new("bar.com", 1000),
            Endpoint::new("bar1.com", 1000),
        ]);
        assert_eq!(selector.windows_active(), 1);

        publisher.publish(vec![
            Endpoint::new("foo.com", 599),
            Endpoint::new("bar.com", 1000),
            Endpoint::new("bar1.com", 1000),
        ]);

        let weight_of = |name: &str| {
            let inner = selector.inner.borrow();
            inner
                .live
                .as_ref()
                .unwrap()
                .distribution
                .iter()
                .find(|&&(ref ep, _)| ep.authority().as_str() == name)
                .map(|&(_, w)| w)
        };
        assert_eq!(weight_of("foo.com"), Some(599));
        assert_eq!(weight_of("bar.com"), Some(100));
        assert_eq!(selector.windows_active(), 1);
    }

    #[test]
    fn s6_newer_timestamp_restarts_ramp() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000)]);
        assert_eq!(selector.windows_active(), 0);

        ticker.advance(1_000_000_000);
        publisher.publish(vec![Endpoint::new("foo.com", 1000).with_created_at(1_000_000_000)]);
        assert_eq!(selector.windows_active(), 1);

        let weight_of = |name: &str| {
            let inner = selector.inner.borrow();
            inner
                .live
                .as_ref()
                .unwrap()
                .distribution
                .iter()
                .find(|&&(ref ep, _)| ep.authority().as_str() == name)
                .map(|&(_, w)| w)
        };
        assert_eq!(weight_of("foo.com"), Some(100));
    }

    #[test]
    fn close_cancels_schedules_and_stops_ticks() {
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000)]);
        ticker.advance(500_000_000);
        publisher.publish(vec![Endpoint::new("foo.com", 1000), Endpoint::new("bar.com", 1000)]);
        assert_eq!(exec.active_count(), 1);

        selector.close();
        assert_eq!(exec.active_count(), 0);
    }

    #[test]
    fn zero_weight_ramp_step_reappears_once_positive() {
        // With totalSteps=10 and targetWeight=5, step 1 rounds down to
        // effective weight 0 (floor(5*1/10)=0), so the endpoint starts
        // outside the weighted distribution entirely. It must still come
        // back once a tick raises it to a positive weight (step 2:
        // floor(5*2/10)=1), since the tick rebuild is not allowed to rely
        // on the zero-weight-filtered distribution as its source of
        // membership.
        let exec = ManualExecutor::new();
        let ticker = ManualTicker::new(0);
        let (selector, publisher) = new_selector(&exec, &ticker);

        publisher.publish(vec![Endpoint::new("foo.com", 1000)]);
        ticker.advance(500_000_000);
        publisher.publish(vec![Endpoint::new("foo.com", 1000), Endpoint::new("bar.com", 5)]);
        assert_eq!(selector.windows_active(), 1);

        let weight_of = |name: &str| {
            let inner = selector.inner.borrow();
            inner
                .live
                .as_ref()
                .unwrap()
                .distribution
                .iter()
                .find(|&&(ref ep, _)| ep.authority().as_str() == name)
                .map(|&(_, w)| w)
        };
        assert_eq!(weight_of("bar.com"), None, "zero-weight step is excluded from selection");

        exec.fire_all();
        assert_eq!(weight_of("bar.com"), Some(1), "bar.com must reappear once its step weight is positive");
    }
}
