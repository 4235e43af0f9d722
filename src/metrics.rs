//! Internal instrumentation: a `tacho::Scope`-rooted set of gauges/counters
//! recording the selector's internal state, in the shape of the
//! repository's `balancer::manager::Metrics`.
//!
//! This is strictly an in-process counter/gauge surface — no HTTP
//! exporter, no Prometheus text format. Wiring a `tacho::Scope` to an
//! admin endpoint remains out of scope for this crate.

use tacho;

/// Gauges and counters for one `RampingUpSelector` instance.
pub struct Metrics {
    pub live_endpoints: tacho::Gauge,
    pub windows_active: tacho::Gauge,
    pub ramping_endpoints: tacho::Gauge,
    pub ramp_starts: tacho::Counter,
    pub graduations: tacho::Counter,
    pub restarts_on_timestamp: tacho::Counter,
    pub upstream_failures: tacho::Counter,
}

impl Metrics {
    pub fn new(base: &tacho::Scope) -> Metrics {
        let gauges = base.clone().prefixed("rampingup");
        let counters = base.clone().prefixed("rampingup");
        Metrics {
            live_endpoints: gauges.gauge("live_endpoints"),
            windows_active: gauges.gauge("windows_active"),
            ramping_endpoints: gauges.gauge("ramping_endpoints"),
            ramp_starts: counters.counter("ramp_starts"),
            graduations: counters.counter("graduations"),
            restarts_on_timestamp: counters.counter("restarts_on_timestamp"),
            upstream_failures: counters.counter("upstream_failures"),
        }
    }
}
