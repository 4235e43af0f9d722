use std::collections::BTreeMap;
use std::fmt;

/// A host, plus an optional port, identifying a routable backend.
///
/// Mirrors the repository's `Path` newtype: a validated wrapper around a
/// `String` rather than a parsed struct, since the producer is trusted to
/// hand us a well-formed authority.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct Authority(String);

impl Authority {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Authority {
    fn from(s: String) -> Authority {
        Authority(s)
    }
}

impl<'a> From<&'a str> for Authority {
    fn from(s: &'a str) -> Authority {
        Authority(s.to_owned())
    }
}

/// An open key/value map of producer-supplied attributes.
///
/// Only the attributes the producer considers stable participate in
/// identity (`EndpointKey`); `createdAtNanos` is tracked separately because
/// it is mutable across republications of the same key (see
/// `Endpoint::created_at_nanos`).
pub type Attributes = BTreeMap<String, String>;

/// The stable identity of an `Endpoint`: authority plus its attributes.
///
/// Two endpoints are the *same endpoint* iff their keys are equal. Weights
/// never participate in identity, and duplicate endpoints in an input list
/// are preserved rather than merged.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EndpointKey {
    authority: Authority,
    attributes: Attributes,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.authority.as_str())
    }
}

/// An immutable routable backend with a non-negative target weight.
///
/// `created_at_nanos` is the producer's claimed creation time. It is
/// `None` until the selector observes the endpoint for the first time and
/// stamps it with `Ticker::now_nanos()` (see `selector::RampingUpSelector`).
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    authority: Authority,
    attributes: Attributes,
    target_weight: u32,
    created_at_nanos: Option<u64>,
}

impl Endpoint {
    pub fn new<A: Into<Authority>>(authority: A, target_weight: u32) -> Endpoint {
        Endpoint {
            authority: authority.into(),
            attributes: Attributes::new(),
            target_weight,
            created_at_nanos: None,
        }
    }

    pub fn with_attributes<A: Into<Authority>>(
        authority: A,
        attributes: Attributes,
        target_weight: u32,
    ) -> Endpoint {
        Endpoint {
            authority: authority.into(),
            attributes,
            target_weight,
            created_at_nanos: None,
        }
    }

    pub fn with_created_at(mut self, nanos: u64) -> Endpoint {
        self.created_at_nanos = Some(nanos);
        self
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn target_weight(&self) -> u32 {
        self.target_weight
    }

    pub fn created_at_nanos(&self) -> Option<u64> {
        self.created_at_nanos
    }

    /// The identity this endpoint shares with any other endpoint of the
    /// same authority and attributes, regardless of weight.
    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            authority: self.authority.clone(),
            attributes: self.attributes.clone(),
        }
    }
}
