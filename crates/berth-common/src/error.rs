//! Error types for berth operations
//!
//! Errors follow a small, closed taxonomy so that every layer (orchestrator,
//! HTTP API, CLI) can decide how to surface them without inspecting messages.
//! Upstream failures are summarized on construction; raw transport errors are
//! never carried to callers.

use thiserror::Error;

/// Main error type for berth operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed catalog entry (operator-facing)
    #[error("invalid template {template}: {message}")]
    InvalidTemplate {
        /// Template identifier, or "unknown" when parsing raw bytes
        template: String,
        /// What is wrong with it
        message: String,
    },

    /// Caller-supplied values failed validation
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of what's invalid
        message: String,
        /// The offending field, when there is one
        field: Option<String>,
    },

    /// Template, resource or ownership record absent
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up ("template", "service", ...)
        kind: String,
        /// Name that was looked up
        name: String,
    },

    /// Singleton violation or lost reservation race
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// No free allocatable identifier
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Which pool ran dry
        message: String,
    },

    /// Cluster API call failed or timed out
    #[error("upstream unavailable [{context}]: {message}")]
    UpstreamUnavailable {
        /// Short summary of the upstream failure
        message: String,
        /// Operation that was being performed
        context: String,
        /// Whether the call hit its deadline
        timed_out: bool,
    },

    /// Local I/O or serialization fault
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where it failed
        context: String,
    },
}

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

impl Error {
    /// Create an invalid-template error for an identified template
    pub fn invalid_template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create a bad-request error without a specific field
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a bad-request error naming the offending field
    pub fn bad_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Create a resource-exhausted error
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: msg.into(),
        }
    }

    /// Create an upstream error with context
    pub fn upstream(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: msg.into(),
            context: context.into(),
            timed_out: false,
        }
    }

    /// Create an upstream timeout error
    pub fn upstream_timeout(context: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: "cluster API call timed out".to_string(),
            context: context.into(),
            timed_out: true,
        }
    }

    /// Summarize a kube-rs error into an upstream error
    ///
    /// API errors keep their status code and server message; transport errors
    /// are reduced to a one-line class so nothing internal leaks to users.
    pub fn from_kube(context: impl Into<String>, err: &kube::Error) -> Self {
        Self::upstream(context, summarize_kube_error(err))
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Anything caused by the caller or the catalog needs a fix, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamUnavailable { .. } => true,
            Error::Internal { .. } => true,
            Error::InvalidTemplate { .. }
            | Error::BadRequest { .. }
            | Error::NotFound { .. }
            | Error::Conflict { .. }
            | Error::ResourceExhausted { .. } => false,
        }
    }

    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidTemplate { .. } => "InvalidTemplate",
            Error::BadRequest { .. } => "BadRequest",
            Error::NotFound { .. } => "NotFound",
            Error::Conflict { .. } => "Conflict",
            Error::ResourceExhausted { .. } => "ResourceExhausted",
            Error::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            Error::Internal { .. } => "Internal",
        }
    }
}

/// Reduce a kube-rs error to a short user-facing line
pub fn summarize_kube_error(err: &kube::Error) -> String {
    match err {
        kube::Error::Api(status) => {
            format!("{} {}: {}", status.code, status.reason, status.message)
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            "cluster API unreachable".to_string()
        }
        kube::Error::SerdeError(_) => "unexpected response from cluster API".to_string(),
        kube::Error::Auth(_) => "cluster API authentication failed".to_string(),
        _ => "cluster API request failed".to_string(),
    }
}

/// Whether a kube-rs error is an API error with the given status code
pub fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error taxonomy drives caller behavior
    // ==========================================================================

    /// Story: catalog problems are reported against the template identifier
    #[test]
    fn story_invalid_template_names_the_template() {
        let err = Error::invalid_template("jupyter", "missing NAME variable");
        assert!(err.to_string().contains("jupyter"));
        assert!(err.to_string().contains("missing NAME variable"));
        assert_eq!(err.kind(), "InvalidTemplate");
        assert!(!err.is_retryable());
    }

    /// Story: validation errors point at the field the caller got wrong
    #[test]
    fn story_bad_request_carries_field() {
        match Error::bad_field("PORT", "expected an integer") {
            Error::BadRequest { field, message } => {
                assert_eq!(field.as_deref(), Some("PORT"));
                assert_eq!(message, "expected an integer");
            }
            other => panic!("Expected BadRequest, got {other:?}"),
        }
    }

    /// Story: only upstream and local faults are worth retrying
    #[test]
    fn story_retry_classification() {
        assert!(Error::upstream("apply", "503 ServiceUnavailable").is_retryable());
        assert!(Error::upstream_timeout("list").is_retryable());
        assert!(Error::internal("disk full").is_retryable());

        assert!(!Error::bad_request("nope").is_retryable());
        assert!(!Error::not_found("service", "web").is_retryable());
        assert!(!Error::conflict("singleton").is_retryable());
        assert!(!Error::exhausted("no prefixes").is_retryable());
    }

    /// Story: timeouts are distinguishable from other upstream failures
    #[test]
    fn story_timeout_flag() {
        match Error::upstream_timeout("delete") {
            Error::UpstreamUnavailable {
                timed_out, context, ..
            } => {
                assert!(timed_out);
                assert_eq!(context, "delete");
            }
            other => panic!("Expected UpstreamUnavailable, got {other:?}"),
        }
    }

    /// Story: API errors keep code and message, nothing else
    #[test]
    fn story_kube_api_errors_are_summarized() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "namespaces \"berth-alice\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        let summary = summarize_kube_error(&err);
        assert_eq!(summary, "404 NotFound: namespaces \"berth-alice\" not found");
        assert!(is_status(&err, 404));
        assert!(!is_status(&err, 409));

        let wrapped = Error::from_kube("get", &err);
        assert_eq!(wrapped.kind(), "UpstreamUnavailable");
        assert!(wrapped.to_string().contains("404 NotFound"));
    }
}
