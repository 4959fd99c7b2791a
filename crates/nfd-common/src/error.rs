//! Error types for the NFD operator
//!
//! Errors carry the component and object identity they occurred on so that a
//! joined error from a reconcile pass still says which managed resource failed.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for NFD operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A managed component failed to converge
    #[error("{component} {namespace}/{name}: {source}")]
    Component {
        /// Component label (e.g. "worker DaemonSet")
        component: String,
        /// Managed resource name
        name: String,
        /// Managed resource namespace
        namespace: String,
        /// What went wrong
        source: Box<Error>,
    },

    /// Controller owner reference could not be set on a managed resource
    #[error("cannot set owner reference on {kind} {name}: {message}")]
    OwnerReference {
        /// Kind of the object being owned
        kind: String,
        /// Name of the object being owned
        name: String,
        /// Why assignment failed
        message: String,
    },

    /// The prune Job ran and failed; finalization is blocked until an
    /// operator removes or fixes the Job
    #[error("prune job {namespace}/{name} failed: {message}")]
    PruneJobFailed {
        /// Job namespace
        namespace: String,
        /// Job name
        name: String,
        /// Failure reason reported by the Job
        message: String,
    },

    /// A bounded wait expired
    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Wait bound
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },

    /// Several independent components failed in the same pass
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap an error with the component and object it occurred on
    pub fn component(
        component: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::Component {
            component: component.into(),
            name: name.into(),
            namespace: namespace.into(),
            source: Box::new(source),
        }
    }

    /// Create an owner reference error
    pub fn owner_reference(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::OwnerReference {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a prune Job failure error
    pub fn prune_job_failed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::PruneJobFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
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

    /// Join the errors collected over a reconcile pass.
    ///
    /// Returns `None` for an empty list and the error itself for a single one.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Check if this error is retryable
    ///
    /// Owner reference and serialization errors need a code or spec change.
    /// A failed prune Job needs an operator to intervene. Everything else may
    /// resolve on a later pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Component { source, .. } => source.is_retryable(),
            Error::OwnerReference { .. } => false,
            Error::PruneJobFailed { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_retryable),
        }
    }

    /// Check if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Component { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this is a resource-version conflict on write
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            Error::Component { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}
