//! Error types for the MongoDB deployment operator
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries contextual information like resource names, annotation
//! keys, and whether the failure is expected to resolve on retry.

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Persisted reconciliation state could not be decoded.
    ///
    /// Raised only for malformed JSON in an annotation; an absent annotation
    /// is not an error, it triggers defaulting or migration instead.
    #[error("malformed state in annotation {annotation}: {message}")]
    State {
        /// The annotation key that failed to decode
        annotation: String,
        /// Description of the decode failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Ops Manager (Automation Controller) request failed
    #[error("ops manager error [{context}]: {message}")]
    OpsManager {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "deployment", "backup")
        context: String,
    },

    /// A bounded wait for the remote system elapsed without convergence.
    ///
    /// The reconciler treats this as "pending, retry shortly" rather than a
    /// terminal failure.
    #[error("timed out waiting for {what}: {message}")]
    Timeout {
        /// What was being waited for (e.g., "goal state", "backup status")
        what: String,
        /// Description of the state at timeout
        message: String,
    },

    /// Validation error for deployment specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a malformed-state error for the given annotation key
    pub fn state(annotation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::State {
            annotation: annotation.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error without a known document kind
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
            kind: None,
        }
    }

    /// Create an Ops Manager error with the given context
    pub fn ops_manager(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OpsManager {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Timeout {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for the given resource
    pub fn validation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Whether the reconciler should report this as pending instead of failed.
    ///
    /// Timeouts mean the remote system has accepted a change but has not yet
    /// converged; a short requeue is expected to find it applied.
    pub fn is_pending(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
