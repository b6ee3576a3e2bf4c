//! Capability names and endpoint validation.
//!
//! Capabilities follow a `domain.action` convention: lowercase dotted
//! segments, at least two (`account.balance`, `product.search.by_sku`).
//! Validating at registration catches typos before they become routing keys
//! nobody resolves.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::errors::A2AError;

static CAPABILITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap());
static CHANNEL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_\-]*$").unwrap());

/// Check a capability against the `domain.action` convention.
pub fn validate_capability(capability: &str) -> Result<(), A2AError> {
    if CAPABILITY_PATTERN.is_match(capability) {
        Ok(())
    } else {
        Err(A2AError::Registration(format!(
            "capability '{}' does not follow the 'domain.action' convention",
            capability
        )))
    }
}

/// Domain part of a capability (`account` for `account.balance`).
pub fn capability_domain(capability: &str) -> &str {
    capability.split('.').next().unwrap_or_default()
}

/// Check an endpoint map: at least one entry, lowercase channel names, and
/// absolute URLs with a host.
pub fn validate_endpoints(endpoints: &BTreeMap<String, String>) -> Result<(), A2AError> {
    if endpoints.is_empty() {
        return Err(A2AError::Registration(
            "at least one endpoint is required".to_string(),
        ));
    }
    for (channel, address) in endpoints {
        if !CHANNEL_PATTERN.is_match(channel) {
            return Err(A2AError::Registration(format!(
                "invalid endpoint channel name '{}'",
                channel
            )));
        }
        let url = Url::parse(address).map_err(|e| {
            A2AError::Registration(format!("malformed {} endpoint '{}': {}", channel, address, e))
        })?;
        if !url.has_host() {
            return Err(A2AError::Registration(format!(
                "{} endpoint '{}' has no host",
                channel, address
            )));
        }
    }
    Ok(())
}
