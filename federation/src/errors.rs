use http::StatusCode;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

/// Errors that can occur while serving a federated request
#[derive(Error, Debug)]
pub enum FederationError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Node request failed for {0}: {1}")]
    NodeRequestFailed(String, String),

    #[error("Node {0} answered with an unreadable body: {1}")]
    InvalidNodeResponse(String, String),

    #[error("Node timeout for {0}")]
    NodeTimeout(String),

    #[error("No matching files found for {0}")]
    NoMatchingFiles(String),

    #[error("Query rewrite failed on every targeted node: {0}")]
    RewriteFailed(String),

    #[error("Request does not name a known target cluster")]
    MissingTargetCluster,

    #[error("Unknown target cluster: {0}")]
    UnknownTargetCluster(String),

    #[error("No nodes configured")]
    NoNodes,

    #[error("Invalid TLS configuration: {0}")]
    TlsConfig(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Response build error: {0}")]
    ResponseBuildError(#[from] http::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FederationError {
    /// HTTP status returned to the client when a handler fails with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FederationError::RequestBodyError(_)
            | FederationError::InvalidJson(_)
            | FederationError::NoMatchingFiles(_)
            | FederationError::RewriteFailed(_)
            | FederationError::MissingTargetCluster
            | FederationError::UnknownTargetCluster(_) => StatusCode::BAD_REQUEST,
            FederationError::NodeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FederationError::NodeRequestFailed(_, _)
            | FederationError::InvalidNodeResponse(_, _)
            | FederationError::ResponseBodyError(_)
            | FederationError::HttpClientError(_) => StatusCode::BAD_GATEWAY,
            FederationError::NoNodes => StatusCode::SERVICE_UNAVAILABLE,
            FederationError::TlsConfig(_)
            | FederationError::ResponseBuildError(_)
            | FederationError::InternalError(_)
            | FederationError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Search-engine style error type name used in JSON error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            FederationError::NoMatchingFiles(_) | FederationError::RewriteFailed(_) => {
                "query_rewrite_exception"
            }
            FederationError::MissingTargetCluster | FederationError::UnknownTargetCluster(_) => {
                "illegal_argument_exception"
            }
            FederationError::RequestBodyError(_) | FederationError::InvalidJson(_) => {
                "parse_exception"
            }
            _ => "federation_exception",
        }
    }

    /// Error body in the shape search clients already understand.
    pub fn to_json(&self) -> JsonValue {
        let status = self.status_code().as_u16();
        json!({
            "error": {
                "type": self.error_type(),
                "reason": self.to_string(),
            },
            "status": status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body() {
        let error = FederationError::NoMatchingFiles("/data/*.pcap".into());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error.to_json(),
            json!({
                "error": {
                    "type": "query_rewrite_exception",
                    "reason": "No matching files found for /data/*.pcap",
                },
                "status": 400,
            })
        );

        let error = FederationError::NodeTimeout("es1:9200".into());
        assert_eq!(error.to_json()["status"], 504);

        // A broken node answer is a gateway failure, not a client error
        let error = FederationError::InvalidNodeResponse("es1:9200".into(), "expected value".into());
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(error.error_type(), "federation_exception");
    }
}
