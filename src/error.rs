//! Error types for the hcloud provider.
//!
//! Remote failures are decoded exactly once, at the API boundary, into an
//! [`ApiError`] carrying a closed [`ErrorCode`]. Everything above that boundary
//! matches on the code instead of comparing strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::Diagnostic;

/// Error code reported by the cloud API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// The addressed resource does not exist.
    NotFound,
    /// A conflicting operation is in progress on the resource.
    Conflict,
    /// The resource is locked by another action.
    Locked,
    /// The platform had an internal hiccup.
    ServiceError,
    /// The load balancer is already attached to the requested network.
    LoadBalancerAlreadyAttached,
    /// Any other code, kept verbatim.
    Other(String),
}

impl ErrorCode {
    /// Decode a wire error code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "not_found" => Self::NotFound,
            "conflict" => Self::Conflict,
            "locked" => Self::Locked,
            "service_error" => Self::ServiceError,
            "load_balancer_already_attached" => Self::LoadBalancerAlreadyAttached,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire representation of this code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Locked => "locked",
            Self::ServiceError => "service_error",
            Self::LoadBalancerAlreadyAttached => "load_balancer_already_attached",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// How a failure is handled where it is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve shortly; the call is re-issued after a backoff.
    Transient,
    /// The desired end state already holds; reported as success.
    AlreadySatisfied,
    /// A stale or malformed local id; the resource is dropped from state.
    InvalidLocalId,
    /// Propagated to the caller with the original message.
    Fatal,
}

/// An error returned by the cloud API, or by a remote action that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct ApiError {
    /// The decoded error code.
    pub code: ErrorCode,
    /// The human-readable message from the platform.
    pub message: String,
    /// The command of the failed action, if this error came from an action.
    pub action: Option<String>,
}

impl ApiError {
    /// Create an error for a failed request.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            action: None,
        }
    }

    /// Create an error for an action that finished with status `error`.
    pub fn action_failed(
        command: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            action: Some(command.into()),
        }
    }

    /// Shorthand for a `not_found` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Whether the error carries the given code.
    pub fn is(&self, code: &ErrorCode) -> bool {
        &self.code == code
    }

    /// Whether the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        self.is(&ErrorCode::NotFound)
    }
}

/// A composite resource id that does not resolve to a live relationship.
///
/// Parse failures, missing resources and missing relationship records all
/// collapse into this one error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid relationship id: {0:?}")]
pub struct InvalidId(pub String);

/// Errors surfaced by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A state document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cloud API rejected a call or an action failed.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// A composite id could not be resolved.
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    /// Operation not supported for this resource type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Api(err) => err.message.clone(),
            Self::InvalidId(err) => err.to_string(),
        }
    }

    /// The handling class of an error that reached the provider surface.
    ///
    /// Transient and already-satisfied conditions are absorbed by the retry
    /// wrapper, so only stale ids and fatal errors get this far.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidId(_) => ErrorClass::InvalidLocalId,
            _ => ErrorClass::Fatal,
        }
    }

    /// Render this error as an error diagnostic for the plugin host.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::error(self.to_string());
        match self {
            Self::Api(err) => match &err.action {
                Some(command) => diagnostic.with_detail(format!(
                    "action {:?} failed with code {}",
                    command, err.code
                )),
                None => diagnostic.with_detail(format!("error code {}", err.code)),
            },
            _ => diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_decoding() {
        assert_eq!(ErrorCode::from_code("not_found"), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_code("locked"), ErrorCode::Locked);
        assert_eq!(
            ErrorCode::from_code("load_balancer_already_attached"),
            ErrorCode::LoadBalancerAlreadyAttached
        );
        assert_eq!(
            ErrorCode::from_code("uniqueness_error"),
            ErrorCode::Other("uniqueness_error".to_string())
        );
        assert_eq!(ErrorCode::Other("x".to_string()).as_str(), "x");
    }

    #[test]
    fn test_error_code_serde() {
        let code: ErrorCode = serde_json::from_str("\"conflict\"").unwrap();
        assert_eq!(code, ErrorCode::Conflict);
        assert_eq!(
            serde_json::to_string(&ErrorCode::ServiceError).unwrap(),
            "\"service_error\""
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new(ErrorCode::Locked, "server is locked");
        assert_eq!(err.to_string(), "server is locked (locked)");
        assert!(!err.is_not_found());
        assert!(ApiError::not_found("gone").is_not_found());
    }

    #[test]
    fn test_provider_error_keeps_api_message() {
        let err: ProviderError =
            ApiError::new(ErrorCode::Other("forbidden".into()), "token lacks write scope").into();
        assert_eq!(err.to_string(), "token lacks write scope (forbidden)");
        assert_eq!(err.message(), "token lacks write scope");
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::UnknownResource("hcloud_floating_ip".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: hcloud_floating_ip");

        let err: ProviderError = InvalidId("abc".to_string()).into();
        assert_eq!(err.to_string(), "invalid relationship id: \"abc\"");
    }

    #[test]
    fn test_provider_error_class() {
        let err: ProviderError = InvalidId("1-".to_string()).into();
        assert_eq!(err.class(), ErrorClass::InvalidLocalId);

        let err = ProviderError::Validation("bad".to_string());
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_action_failure_diagnostic() {
        let err: ProviderError = ApiError::action_failed(
            "attach_to_network",
            ErrorCode::Other("action_failed".into()),
            "network is unavailable",
        )
        .into();
        let diagnostic = err.to_diagnostic();
        assert_eq!(diagnostic.summary, "network is unavailable (action_failed)");
        assert_eq!(
            diagnostic.detail.as_deref(),
            Some("action \"attach_to_network\" failed with code action_failed")
        );
    }
}
