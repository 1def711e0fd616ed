// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Error types for the admin API client, credentials, and the configuration document.

use serde::Deserialize;

/// Errors the [`crate::api::AdminClient`] may return.
///
/// Callers are expected to match on the variant: a [`ApiError::Conflict`] in response to a
/// mutating call usually means the desired state already exists, while the remaining variants
/// are genuine failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The server responded with HTTP 409.
    ///
    /// The admin API uses this for "already exists" and "already in that state" conditions.
    /// The `code` is the error code from the response body, if the body could be parsed, and
    /// should be consulted by operations where a 409 can mean something other than "already
    /// done".
    #[error("{endpoint}: conflict ({}): {detail}", .code.as_deref().unwrap_or("no error code"))]
    Conflict {
        endpoint: String,
        code: Option<String>,
        detail: String,
    },

    /// The server responded with HTTP 404.
    #[error("{endpoint}: not found: {detail}")]
    NotFound { endpoint: String, detail: String },

    /// The server responded with some other non-success status.
    ///
    /// This covers authentication failures, validation errors, and internal server errors.
    /// Retrying is unlikely to help without a configuration change.
    #[error("{endpoint}: HTTP {status} ({}): {detail}", .code.as_deref().unwrap_or("no error code"))]
    Remote {
        endpoint: String,
        status: u16,
        code: Option<String>,
        detail: String,
    },

    /// The request could not be sent, or the response could not be read or decoded.
    ///
    /// This is very likely due to the server being unreachable, but it could also be because
    /// the configured URL is incorrect or the server speaks an unexpected API version.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The configured server URL, or a URL derived from it, is invalid.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The API key contains characters that can't be sent in an HTTP header.
    #[error("the API key is not a valid header value")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),

    /// A local file (certificate, anchor, CA certificate) could not be read or parsed.
    #[error("{path}: {reason}")]
    LocalFile { path: String, reason: String },
}

impl ApiError {
    /// Returns true if the server signalled the entity already exists or is already in the
    /// requested state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    /// Returns true if the server could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    /// The error code reported by the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Conflict { code, .. } | ApiError::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Build the error for a non-success response.
    pub(crate) fn from_status(endpoint: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let info = serde_json::from_str::<ErrorInfo>(body).ok();
        let code = info
            .as_ref()
            .and_then(|info| info.error.as_ref())
            .and_then(|error| error.code.clone());
        let detail = match (body.is_empty(), status) {
            (true, reqwest::StatusCode::UNAUTHORIZED) => "bad or missing API key".to_string(),
            (true, reqwest::StatusCode::FORBIDDEN) => {
                "the API key lacks the role required for this operation".to_string()
            }
            (true, status) => status.to_string(),
            (false, _) => body.to_string(),
        };
        let endpoint = endpoint.to_string();

        match status {
            reqwest::StatusCode::CONFLICT => ApiError::Conflict {
                endpoint,
                code,
                detail,
            },
            reqwest::StatusCode::NOT_FOUND => ApiError::NotFound { endpoint, detail },
            status => ApiError::Remote {
                endpoint,
                status: status.as_u16(),
                code,
                detail,
            },
        }
    }
}

/// The error document the admin API returns alongside failure statuses.
#[derive(Debug, Deserialize)]
struct ErrorInfo {
    error: Option<CodeWithDetails>,
}

#[derive(Debug, Deserialize)]
struct CodeWithDetails {
    code: Option<String>,
}

/// Errors found while loading or validating the configuration document.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML, contains unknown keys, or has values outside the
    /// allowed set for an enumerated setting.
    #[error("configuration is invalid: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Keys needed for the requested operation are absent from a security server entry.
    #[error("security server '{server}' is missing required keys: {}", .keys.join(", "))]
    MissingKeys { server: String, keys: Vec<String> },

    /// Two security server entries share a name.
    #[error("security server name '{0}' is used more than once")]
    DuplicateServer(String),
}

/// Errors resolving the API key for a security server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialsError {
    /// The server entry has no `api_key` and there's no `api_key` section to create one with.
    #[error("no api_key is configured and the api_key section needed to create one is missing")]
    Missing,

    /// The `api_key.credentials` setting isn't in the `user:password` form.
    #[error("api_key credentials must be in the form user:password")]
    MalformedCredentials,

    /// Creating an API key through the api-keys endpoint failed.
    #[error("failed to create an API key: {0}")]
    Creation(#[source] ApiError),

    /// The `ca_certificate` file can't be read, so no connection can be set up.
    #[error("failed to load the CA certificate: {0}")]
    CaCertificate(#[source] ApiError),
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn conflict_with_error_code() {
        let body = r#"{"status":409,"error":{"code":"certificate_already_exists","metadata":[]}}"#;
        let error = ApiError::from_status("/token-certificates", StatusCode::CONFLICT, body);

        assert!(error.is_conflict());
        assert_eq!(Some("certificate_already_exists"), error.code());
    }

    #[test]
    fn conflict_without_body() {
        let error = ApiError::from_status("/clients", StatusCode::CONFLICT, "");

        assert!(error.is_conflict());
        assert_eq!(None, error.code());
    }

    #[test]
    fn unauthorized_without_body() {
        let error = ApiError::from_status("/clients", StatusCode::UNAUTHORIZED, "");

        match error {
            ApiError::Remote { status, detail, .. } => {
                assert_eq!(401, status);
                assert_eq!("bad or missing API key", detail);
            }
            other => panic!("unexpected error variant {other:?}"),
        }
    }

    #[test]
    fn not_found() {
        let error = ApiError::from_status("/tokens/0", StatusCode::NOT_FOUND, "no such token");

        assert!(matches!(error, ApiError::NotFound { .. }));
        assert!(!error.is_conflict());
        assert!(!error.is_transport());
    }

    #[test]
    fn non_json_body_is_kept_as_detail() {
        let error =
            ApiError::from_status("/initialization", StatusCode::BAD_REQUEST, "<html>nope</html>");

        match error {
            ApiError::Remote { code, detail, .. } => {
                assert_eq!(None, code);
                assert_eq!("<html>nope</html>", detail);
            }
            other => panic!("unexpected error variant {other:?}"),
        }
    }
}
