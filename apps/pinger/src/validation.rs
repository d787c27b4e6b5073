//! Checks applied to user-submitted targets before they are monitored.

use url::Url;

use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::Target;

/// Validate and normalize a target definition
pub fn validate_target(name: &str, url: &str, frequency: u64) -> MonitorResult<Target> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MonitorError::InvalidTarget("name must not be empty".to_string()));
    }

    let url = url.trim();
    validate_url(url)?;

    if frequency == 0 {
        return Err(MonitorError::InvalidTarget(
            "frequency must be at least one second".to_string(),
        ));
    }

    Ok(Target::new(name, url, frequency))
}

/// Only absolute http(s) urls with a host can be probed
pub fn validate_url(target: &str) -> MonitorResult<()> {
    let url = Url::parse(target)
        .map_err(|e| MonitorError::InvalidTarget(format!("invalid url {target}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(MonitorError::InvalidTarget(format!("unsupported scheme: {other}")));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(MonitorError::InvalidTarget(format!("url {target} has no host")));
    }

    Ok(())
}
