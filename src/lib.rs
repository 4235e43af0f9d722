#[macro_use]
extern crate log;
extern crate futures;
extern crate ordermap;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;
extern crate tokio_core;
extern crate tokio_timer;

mod config;
mod distribution;
mod endpoint;
mod error;
mod executor;
mod factory;
mod group;
mod metrics;
mod selector;
mod transition;
mod window;

pub use self::config::{
    from_str as strategy_config_from_str, RampingUpStrategyConfig, RampingUpStrategyParams,
    TransitionKind,
};
pub use self::distribution::WeightedRandomDistribution;
pub use self::endpoint::{Attributes, Authority, Endpoint, EndpointKey};
pub use self::error::{ConfigError, SelectError};
pub use self::executor::{
    duration_from_nanos, ManualExecutor, ManualTicker, MonotonicTicker, RampExecutor,
    ReactorExecutor, ScheduledHandle, Ticker,
};
pub use self::factory::RampingUpStrategyFactory;
pub use self::group::{
    new as watched_endpoint_group, EndpointGroup, EndpointPublisher, ListenerId,
    WatchedEndpointGroup, WhenReady,
};
pub use self::selector::RampingUpSelector;
pub use self::transition::{Exponential, Linear, Transition};
