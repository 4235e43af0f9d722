//! Deserializable strategy configuration, mirroring the repository's
//! `*Config` convention: `Option<_>` fields, `deny_unknown_fields`,
//! `camelCase` wire names, repository-wide defaults applied at build time,
//! and an `update` method for layering a partial override onto a base
//! config (the repository's `ConnectorConfig`/`FailFastConfig` pattern).

use serde_json;
use serde_yaml;
use std::io;

use error::ConfigError;
use transition::{Exponential, Linear, Transition};

const DEFAULT_TOTAL_STEPS: u32 = 10;

/// Parses a `RampingUpStrategyConfig` from either JSON or YAML, auto
/// detecting the format from the leading byte the way the repository's
/// top-level config loader does.
pub fn from_str(mut txt: &str) -> io::Result<RampingUpStrategyConfig> {
    txt = txt.trim_left();
    if txt.starts_with('{') {
        serde_json::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        serde_yaml::from_str(txt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// The ramp-up strategy's own configuration slice, meant to be embedded in
/// a larger application's configuration file the way the repository nests
/// `ConnectorConfig` under `BalancerConfig` under `ProxyConfig`. Parsing a
/// whole application config remains outside this crate's scope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RampingUpStrategyConfig {
    pub ramping_up_interval_ms: Option<u64>,
    pub total_steps: Option<u32>,
    pub ramping_up_task_window_ms: Option<u64>,
    pub transition: Option<TransitionKind>,
}

/// The weight-transition function to apply, tagged the way the repository
/// tags its `*FactoryConfig` enums (`ConnectorFactoryConfig`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, tag = "kind")]
pub enum TransitionKind {
    #[serde(rename = "linear")]
    Linear,

    #[serde(rename = "exponential")]
    Exponential { base: f64 },
}

impl Default for TransitionKind {
    fn default() -> TransitionKind {
        TransitionKind::Linear
    }
}

impl TransitionKind {
    fn build(&self) -> Result<Box<Transition>, ConfigError> {
        match *self {
            TransitionKind::Linear => Ok(Box::new(Linear::default())),
            TransitionKind::Exponential { base } => {
                if base <= 1.0 {
                    return Err("exponential transition `base` must be > 1.0".into());
                }
                Ok(Box::new(Exponential::new(base)))
            }
        }
    }
}

/// Parameters fully validated and defaulted, ready to hand to
/// `StrategyFactory::new_selector`.
pub struct RampingUpStrategyParams {
    pub ramping_up_interval_nanos: u64,
    pub total_steps: u32,
    pub ramping_up_task_window_nanos: u64,
    pub transition: Box<Transition>,
}

impl RampingUpStrategyConfig {
    /// Applies repository-wide defaults, then validates, surfacing the
    /// first violated constraint as a `ConfigError` the same way the
    /// repository's connector/server configs do.
    ///
    /// `ramping_up_interval_ms` has no safe default — it is domain
    /// specific — so its absence is itself a configuration error.
    pub fn build(&self) -> Result<RampingUpStrategyParams, ConfigError> {
        let interval_ms = self.ramping_up_interval_ms
            .ok_or_else(|| ConfigError::from("`rampingUpIntervalMs` is required"))?;
        if interval_ms == 0 {
            return Err("`rampingUpIntervalMs` must be > 0".into());
        }
        let interval_nanos = interval_ms * 1_000_000;

        let total_steps = self.total_steps.unwrap_or(DEFAULT_TOTAL_STEPS);
        if total_steps < 1 {
            return Err("`totalSteps` must be >= 1".into());
        }

        let window_ms = self.ramping_up_task_window_ms.unwrap_or_else(|| {
            let per_step = interval_ms / u64::from(total_steps);
            if per_step == 0 {
                1
            } else {
                per_step
            }
        });
        if window_ms == 0 {
            return Err("`rampingUpTaskWindowMs` must be > 0".into());
        }
        if window_ms > interval_ms {
            return Err("`rampingUpTaskWindowMs` must be <= `rampingUpIntervalMs`".into());
        }
        let window_nanos = window_ms * 1_000_000;

        let transition = self.transition
            .clone()
            .unwrap_or_default()
            .build()?;

        Ok(RampingUpStrategyParams {
            ramping_up_interval_nanos: interval_nanos,
            total_steps,
            ramping_up_task_window_nanos: window_nanos,
            transition,
        })
    }

    /// Layers `other`'s present fields onto `self`, the repository's
    /// `ConnectorConfig::update` pattern for merging a partial override.
    pub fn update(&mut self, other: &RampingUpStrategyConfig) {
        if let Some(v) = other.ramping_up_interval_ms {
            self.ramping_up_interval_ms = Some(v);
        }
        if let Some(v) = other.total_steps {
            self.total_steps = Some(v);
        }
        if let Some(v) = other.ramping_up_task_window_ms {
            self.ramping_up_task_window_ms = Some(v);
        }
        if let Some(ref v) = other.transition {
            self.transition = Some(v.clone());
        }
    }
}
