use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status value of a target that has not completed a probe yet.
///
/// A failed probe is recorded with the same value.
pub const NOT_PROBED: u16 = 0;

/// A monitored endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Display name
    pub name: String,

    /// Address to probe, also the scheduling key
    pub url: String,

    /// Most recently observed HTTP status, or [`NOT_PROBED`]
    pub last_status_code: u16,

    /// Seconds between probes
    pub frequency: u64,
}

impl Target {
    /// Create a target that has not been probed yet
    pub fn new(name: impl Into<String>, url: impl Into<String>, frequency: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            last_status_code: NOT_PROBED,
            frequency,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency)
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.last_status_code)
    }
}

/// Coarse health bucket of an HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Unknown,
    Healthy,
    Redirect,
    Failing,
}

impl StatusClass {
    pub fn of(code: u16) -> Self {
        match code {
            NOT_PROBED => StatusClass::Unknown,
            200..=299 => StatusClass::Healthy,
            300..=399 => StatusClass::Redirect,
            _ => StatusClass::Failing,
        }
    }
}

impl std::fmt::Display for StatusClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusClass::Unknown => write!(f, "unknown"),
            StatusClass::Healthy => write!(f, "healthy"),
            StatusClass::Redirect => write!(f, "redirect"),
            StatusClass::Failing => write!(f, "failing"),
        }
    }
}

/// A status transition observed by a probe task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub name: String,
    pub url: String,
    pub previous: u16,
    pub current: u16,
    pub observed_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn class(&self) -> StatusClass {
        StatusClass::of(self.current)
    }
}
