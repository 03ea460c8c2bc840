//! Error types and the store-error taxonomy driving retry decisions.

use thiserror::Error;

/// Operator result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reconciliation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error.
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic concurrency lost; the caller requeues without logging at
    /// error level.
    #[error("Conflict: concurrent modification detected")]
    Conflict,

    /// Referenced object disappeared.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Listing by an index nobody registered.
    #[error("Field index '{0}' is not registered")]
    UnknownIndex(String),

    /// Target cluster/environment could not be resolved.
    #[error("Target resolution failed: {0}")]
    TargetResolution(String),

    /// Catalog entry could not be lowered into runtime objects.
    #[error("Translation failed: {0}")]
    Translate(String),

    /// Config or validation failure; recorded in status, not retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Master-agent runtime error.
    #[error("Agent runtime error: {0}")]
    Agent(#[from] agentregistry_agent::AgentError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Manifest serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Classification of a store error, mirroring the apiserver reason set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreErrorKind {
    Conflict,
    NotFound,
    AlreadyExists,
    Invalid,
    Timeout,
    Internal,
    Unavailable,
    Unknown,
}

impl StoreErrorKind {
    /// Whether the discovery retry helper should try again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StoreErrorKind::Conflict
                | StoreErrorKind::Timeout
                | StoreErrorKind::Internal
                | StoreErrorKind::Unavailable
                | StoreErrorKind::Unknown
        )
    }
}

/// Classify an error into the retry taxonomy.
pub fn classify(error: &Error) -> StoreErrorKind {
    match error {
        Error::Conflict => StoreErrorKind::Conflict,
        Error::NotFound(_) => StoreErrorKind::NotFound,
        Error::AlreadyExists(_) => StoreErrorKind::AlreadyExists,
        Error::Validation(_) | Error::UnknownIndex(_) | Error::Translate(_) => StoreErrorKind::Invalid,
        Error::Kube(kube::Error::Api(response)) => match response.reason.as_str() {
            "Conflict" => StoreErrorKind::Conflict,
            "NotFound" => StoreErrorKind::NotFound,
            "AlreadyExists" => StoreErrorKind::AlreadyExists,
            "Invalid" | "BadRequest" => StoreErrorKind::Invalid,
            "Timeout" | "ServerTimeout" => StoreErrorKind::Timeout,
            "InternalError" => StoreErrorKind::Internal,
            "ServiceUnavailable" => StoreErrorKind::Unavailable,
            _ => match response.code {
                404 => StoreErrorKind::NotFound,
                409 => StoreErrorKind::Conflict,
                400 | 422 => StoreErrorKind::Invalid,
                408 | 504 => StoreErrorKind::Timeout,
                500 => StoreErrorKind::Internal,
                503 => StoreErrorKind::Unavailable,
                _ => StoreErrorKind::Unknown,
            },
        },
        _ => StoreErrorKind::Unknown,
    }
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        classify(self) == StoreErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        classify(self) == StoreErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn classification_by_reason() {
        assert_eq!(classify(&api_error(409, "Conflict")), StoreErrorKind::Conflict);
        assert_eq!(classify(&api_error(404, "NotFound")), StoreErrorKind::NotFound);
        assert_eq!(classify(&api_error(409, "AlreadyExists")), StoreErrorKind::AlreadyExists);
        assert_eq!(classify(&api_error(422, "Invalid")), StoreErrorKind::Invalid);
        assert_eq!(classify(&api_error(503, "ServiceUnavailable")), StoreErrorKind::Unavailable);
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(StoreErrorKind::Conflict.is_retryable());
        assert!(StoreErrorKind::Timeout.is_retryable());
        assert!(StoreErrorKind::Internal.is_retryable());
        assert!(StoreErrorKind::Unavailable.is_retryable());
        assert!(StoreErrorKind::Unknown.is_retryable());
        assert!(!StoreErrorKind::NotFound.is_retryable());
        assert!(!StoreErrorKind::AlreadyExists.is_retryable());
        assert!(!StoreErrorKind::Invalid.is_retryable());
    }

    #[test]
    fn conflict_helper() {
        assert!(Error::Conflict.is_conflict());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(404, "NotFound").is_conflict());
    }
}
