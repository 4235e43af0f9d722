use std::error;
use std::fmt;

/// An error raised synchronously while validating or building a ramping-up
/// strategy.
///
/// No partial selector is ever created: either `RampingUpStrategyFactory`
/// returns a working selector or it returns this error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for ConfigError {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for ConfigError {
    fn from(s: &'a str) -> ConfigError {
        ConfigError(s.to_owned())
    }
}

impl From<String> for ConfigError {
    fn from(s: String) -> ConfigError {
        ConfigError(s)
    }
}

/// Internal failure surfaced by the distribution or window scheduler.
///
/// `SelectError` never crosses the `selectNow` boundary: callers only ever
/// see `Option<Endpoint>`. It exists so internal invariant violations can be
/// logged with a real error value instead of panicking the event loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectError {
    /// A rebuild observed a negative or otherwise invalid weight.
    InvalidWeight { key: String, weight: i64 },
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SelectError::InvalidWeight { ref key, weight } => {
                write!(f, "endpoint {} has invalid weight {}", key, weight)
            }
        }
    }
}

impl error::Error for SelectError {
    fn description(&self) -> &str {
        "invalid internal selector state"
    }
}
