//! ARM error classification and handling
//!
//! Provides typed errors for ARM REST responses using the HTTP status and the
//! `error.code` field of the response body instead of string matching.

use serde::Deserialize;
use thiserror::Error;

/// ARM error categories for retry and cleanup logic
#[derive(Debug, Error)]
pub enum ArmError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Another operation is running on the resource, or it is still in use
    #[error("Conflict: {message}")]
    Conflict { code: Option<String>, message: String },

    /// Credentials missing, expired, or lacking permission
    #[error("Unauthorized: {message}")]
    Unauthorized { code: Option<String>, message: String },

    /// Server side failure (retryable)
    #[error("ARM service error ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Any other ARM error with status, code and message
    #[error("ARM error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl ArmError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArmError::Throttled | ArmError::Unavailable { .. } | ArmError::Conflict { .. }
        )
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        let code = match self {
            ArmError::Unauthorized { code, .. } => code.as_deref().or(Some("Unauthorized")),
            ArmError::Conflict { code, .. } | ArmError::Api { code, .. } => code.as_deref(),
            ArmError::Throttled => Some("TooManyRequests"),
            _ => None,
        }?;
        suggestion_for_code(code)
    }
}

/// Known ARM error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "NotFound",
    "ParentResourceNotFound",
    "StorageAccountNotFound",
    "ContainerNotFound",
];

/// Known ARM error codes for throttling
const THROTTLING_CODES: &[&str] = &["TooManyRequests", "SubscriptionRequestsThrottled"];

/// Known ARM error codes for conflicting or in-use resources
const CONFLICT_CODES: &[&str] = &[
    "Conflict",
    "AnotherOperationInProgress",
    "OperationNotAllowed",
    "InUseNetworkInterfaceCannotBeDeleted",
    "PublicIPAddressInUse",
];

/// Known ARM error codes for authentication/authorization failures
const AUTH_CODES: &[&str] = &[
    "AuthenticationFailed",
    "AuthorizationFailed",
    "ExpiredAuthenticationToken",
    "InvalidAuthenticationToken",
];

/// Classify an ARM response using the HTTP status and error code.
pub fn classify_arm_error(status: u16, code: Option<&str>, message: Option<&str>) -> ArmError {
    let message = message.unwrap_or("Unknown error").to_string();

    match (status, code) {
        (_, Some(c)) if NOT_FOUND_CODES.contains(&c) => ArmError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        (404, None) => ArmError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        (_, Some(c)) if THROTTLING_CODES.contains(&c) => ArmError::Throttled,
        (429, _) => ArmError::Throttled,
        (_, Some(c)) if AUTH_CODES.contains(&c) => ArmError::Unauthorized {
            code: Some(c.to_string()),
            message,
        },
        (401 | 403, c) => ArmError::Unauthorized {
            code: c.map(str::to_string),
            message,
        },
        (_, Some(c)) if CONFLICT_CODES.contains(&c) => ArmError::Conflict {
            code: Some(c.to_string()),
            message,
        },
        (409, c) => ArmError::Conflict {
            code: c.map(str::to_string),
            message,
        },
        (500..=599, _) => ArmError::Unavailable { status, message },
        (_, c) => ArmError::Api {
            status,
            code: c.map(str::to_string),
            message,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Classify an ARM response from its status and raw body.
///
/// ARM bodies look like `{"error":{"code":"...","message":"..."}}`; anything
/// else is kept verbatim as the message.
pub fn classify_response(status: u16, body: &str) -> ArmError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => classify_arm_error(
            status,
            envelope.error.code.as_deref(),
            envelope.error.message.as_deref(),
        ),
        Err(_) => {
            let message = body.trim();
            classify_arm_error(status, None, (!message.is_empty()).then_some(message))
        }
    }
}

/// Find the ARM error in an anyhow error chain, if any.
pub fn classify_anyhow_error(error: &anyhow::Error) -> Option<&ArmError> {
    error.chain().find_map(|cause| cause.downcast_ref::<ArmError>())
}

/// Transport timeouts and connection failures anywhere in the chain
pub fn is_transient_transport_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_timeout() || e.is_connect())
}

/// Check whether an anyhow error wraps an ARM "not found" error
pub fn is_not_found(error: &anyhow::Error) -> bool {
    classify_anyhow_error(error).is_some_and(ArmError::is_not_found)
}

/// Map "not found" errors to `Ok(None)`, keeping every other error.
pub fn ignore_not_found<T>(result: anyhow::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "ExpiredAuthenticationToken",
        "Refresh the token, e.g. `az account get-access-token --query accessToken -o tsv`.",
    ),
    (
        "InvalidAuthenticationToken",
        "Check AZURE_ACCESS_TOKEN holds an ARM token for https://management.azure.com/.",
    ),
    (
        "AuthenticationFailed",
        "Check AZURE_ACCESS_TOKEN holds an ARM token for https://management.azure.com/.",
    ),
    (
        "AuthorizationFailed",
        "The principal needs Contributor rights on the resource group.",
    ),
    (
        "Unauthorized",
        "Check AZURE_ACCESS_TOKEN and AZURE_SUBSCRIPTION_ID.",
    ),
    (
        "TooManyRequests",
        "ARM rate limit hit. The request was retried automatically; try again later.",
    ),
    (
        "AnotherOperationInProgress",
        "Another operation is running on this resource; retry once it completes.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
