//! Resource adapters.
//!
//! Each adapter maps one resource type onto [`CloudApi`](crate::api::CloudApi)
//! calls. State documents are `serde_json::Value`s decoded into a typed
//! `*State` struct per resource. `read` returning `None` means the remote
//! resource is gone and the local state should be dropped.

pub mod load_balancer_network;
pub mod server;
pub mod volume;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ApiError, ProviderError};
use crate::models::Id;

/// Decode a state or config document.
pub(crate) fn from_state<T: DeserializeOwned>(state: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(state)?)
}

/// Encode a typed state.
pub(crate) fn to_state<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

/// Parse a numeric resource id. Logs and returns `None` for ids that are
/// missing or not integers.
pub(crate) fn parse_id(kind: &str, id: Option<&str>) -> Option<Id> {
    let raw = id.unwrap_or_default();
    match raw.parse::<Id>() {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(kind, id = raw, error = %err, "Invalid {} id ({:?}), removing from state", kind, raw);
            None
        },
    }
}

/// Turn a `not_found` error into `Ok(None)` so the caller can drop the
/// resource from state.
pub(crate) fn gone_if_not_found<T>(
    kind: &str,
    id: Id,
    result: Result<T, ApiError>,
) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => {
            warn!(kind, id, "{} ({}) not found, removing from state", kind, id);
            Ok(None)
        },
        Err(err) => Err(err),
    }
}

/// Error for a resource that vanished right after it was written.
pub(crate) fn vanished(kind: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} ({}) disappeared after it was written", kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("volume", Some("42")), Some(42));
        assert_eq!(parse_id("volume", Some("vol-42")), None);
        assert_eq!(parse_id("volume", None), None);
    }

    #[test]
    fn test_gone_if_not_found() {
        assert_eq!(gone_if_not_found("server", 1, Ok(3)), Ok(Some(3)));
        assert_eq!(
            gone_if_not_found::<()>("server", 1, Err(ApiError::not_found("gone"))),
            Ok(None)
        );

        let locked = ApiError::new(ErrorCode::Locked, "busy");
        assert_eq!(
            gone_if_not_found::<()>("server", 1, Err(locked.clone())),
            Err(locked)
        );
    }
}
