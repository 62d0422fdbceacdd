//! Cluster client errors

use thiserror::Error;

/// Errors returned by cluster API calls
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists on create
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Request rejected by validation (HTTP 422, reason Invalid)
    #[error("Invalid: {message}")]
    Invalid {
        /// Full error message from the API server
        message: String,
        /// Individual field errors
        causes: Vec<String>,
    },

    /// Optimistic concurrency conflict (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other API status
    #[error("API error {code}: {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from the API server
        message: String,
    },

    /// Transport or client-side failure
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// True for [`ClusterError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// True for [`ClusterError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    /// True for [`ClusterError::Invalid`].
    pub fn is_invalid(&self) -> bool {
        matches!(self, ClusterError::Invalid { .. })
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match (resp.code, resp.reason.as_str()) {
                (404, _) => ClusterError::NotFound(resp.message),
                (409, "AlreadyExists") => ClusterError::AlreadyExists(resp.message),
                (409, _) => ClusterError::Conflict(resp.message),
                (422, "Invalid") => {
                    let causes = invalid_causes(&resp.message);
                    ClusterError::Invalid {
                        message: resp.message,
                        causes,
                    }
                }
                (code, _) => ClusterError::Api {
                    code,
                    message: resp.message,
                },
            },
            other => ClusterError::Kube(other),
        }
    }
}

/// Split `<Kind> "<name>" is invalid: <cause>, <cause>` into its causes.
fn invalid_causes(message: &str) -> Vec<String> {
    let detail = message
        .split_once(" is invalid: ")
        .map_or(message, |(_, rest)| rest);
    let detail = detail.trim_start_matches('[').trim_end_matches(']');
    detail
        .split(", ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_maps_not_found() {
        let err: ClusterError = api_error(404, "NotFound", "secrets \"x\" not found").into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_maps_already_exists_and_conflict() {
        let err: ClusterError = api_error(409, "AlreadyExists", "exists").into();
        assert!(matches!(err, ClusterError::AlreadyExists(_)));

        let err: ClusterError = api_error(409, "Conflict", "object has been modified").into();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_maps_invalid_with_causes() {
        let err: ClusterError = api_error(
            422,
            "Invalid",
            "StatefulSet.apps \"prometheus-k8s\" is invalid: spec.selector: Forbidden: field is immutable, spec.serviceName: Forbidden: field is immutable",
        )
        .into();
        match err {
            ClusterError::Invalid { causes, .. } => {
                assert_eq!(causes.len(), 2, "expected two causes, got {causes:?}");
                assert!(causes[0].starts_with("spec.selector"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_maps_other_codes() {
        let err: ClusterError = api_error(500, "InternalError", "boom").into();
        assert!(matches!(err, ClusterError::Api { code: 500, .. }));
    }
}
