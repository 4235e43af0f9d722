//! Strategy construction, in the shape of the repository's
//! `balancer::factory::BalancerFactory`: a long-lived, cheaply cloneable
//! factory holding validated defaults and a metrics scope, producing one
//! bound selector per `EndpointGroup`.

use std::rc::Rc;
use tacho;
use tokio_core::reactor::Handle;
use tokio_timer::Timer;

use config::RampingUpStrategyConfig;
use error::ConfigError;
use executor::{MonotonicTicker, RampExecutor, ReactorExecutor, Ticker};
use group::EndpointGroup;
use selector::RampingUpSelector;

#[derive(Clone)]
pub struct RampingUpStrategyFactory {
    config: RampingUpStrategyConfig,
    metrics: tacho::Scope,
}

impl RampingUpStrategyFactory {
    pub fn new(config: RampingUpStrategyConfig, metrics: &tacho::Scope) -> RampingUpStrategyFactory {
        RampingUpStrategyFactory {
            config,
            metrics: metrics.clone(),
        }
    }

    /// Validates the held configuration and builds a selector bound to
    /// `group`, driven by a reactor-backed executor and a process-start
    /// monotonic ticker. Returns the first violated constraint as a
    /// `ConfigError` rather than a partially built selector.
    pub fn new_selector(
        &self,
        reactor: &Handle,
        timer: &Timer,
        group: Rc<EndpointGroup>,
    ) -> Result<RampingUpSelector, ConfigError> {
        let params = self.config.build()?;
        let executor: Rc<RampExecutor> = Rc::new(ReactorExecutor::new(reactor.clone(), timer.clone()));
        let ticker: Rc<Ticker> = Rc::new(MonotonicTicker::new());
        Ok(RampingUpSelector::new(group, executor, ticker, params, &self.metrics))
    }

    /// As `new_selector`, but with an explicit executor/ticker pair —
    /// the seam tests use to pass `ManualExecutor`/`ManualTicker`.
    pub fn new_selector_with(
        &self,
        executor: Rc<RampExecutor>,
        ticker: Rc<Ticker>,
        group: Rc<EndpointGroup>,
    ) -> Result<RampingUpSelector, ConfigError> {
        let params = self.config.build()?;
        Ok(RampingUpSelector::new(group, executor, ticker, params, &self.metrics))
    }
}
