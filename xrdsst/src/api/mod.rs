// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! A typed client for the security server admin API.
//!
//! One [`AdminClient`] is created per configured server. Every call returns a
//! [`Result`] with an [`ApiError`] describing exactly how the call failed, so callers can tell
//! an "already exists" conflict apart from a real failure without inspecting response bodies.

use std::path::Path;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    config::{ClientKey, ConnectionType, SecurityServer, API_KEY_PREFIX},
    error::ApiError,
};

pub mod types;

pub use types::*;

const OCTET_STREAM: &str = "application/octet-stream";

/// How to validate the TLS certificate presented by a security server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// If false, any certificate is accepted.
    pub verify: bool,
    /// An additional PEM-encoded root certificate to trust.
    pub ca_certificate: Option<Vec<u8>>,
}

impl TlsPolicy {
    /// The policy configured for a server, with its CA certificate read from disk.
    pub async fn load(server: &SecurityServer) -> Result<Self, ApiError> {
        let ca_certificate = match &server.ca_certificate {
            Some(path) => Some(
                tokio::fs::read(path)
                    .await
                    .map_err(|error| local_file_error(path, error))?,
            ),
            None => None,
        };
        Ok(Self {
            verify: server.tls_verify,
            ca_certificate,
        })
    }

    /// Build an HTTP client that applies this policy.
    pub(crate) fn http_client(&self, headers: HeaderMap) -> Result<reqwest::Client, ApiError> {
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!self.verify);
        if let Some(pem) = &self.ca_certificate {
            let certificate =
                reqwest::Certificate::from_pem(pem).map_err(|error| ApiError::LocalFile {
                    path: "ca_certificate".to_string(),
                    reason: error.to_string(),
                })?;
            builder = builder.add_root_certificate(certificate);
        }
        builder.build().map_err(|source| ApiError::Transport {
            endpoint: "client setup".to_string(),
            source,
        })
    }
}

pub(crate) fn local_file_error(path: &Path, error: impl std::fmt::Display) -> ApiError {
    ApiError::LocalFile {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

/// Build the authorization header value for an API key, with or without its prefix.
pub fn authorization_value(api_key: &str) -> Result<HeaderValue, ApiError> {
    let value = if api_key.starts_with(API_KEY_PREFIX) {
        api_key.to_string()
    } else {
        format!("{API_KEY_PREFIX}{api_key}")
    };
    let mut value = HeaderValue::from_str(&value)?;
    value.set_sensitive(true);
    Ok(value)
}

// Append path segments to a base URL, percent-encoding each segment.
pub(crate) fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Send a request, mapping non-success statuses to the matching [`ApiError`] variant.
pub(crate) async fn send(
    request: RequestBuilder,
    endpoint: &str,
) -> Result<reqwest::Response, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|source| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;
    let status = response.status();
    if status.is_success() {
        tracing::debug!(endpoint, %status, "Request succeeded");
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = ApiError::from_status(endpoint, status, &body);
    tracing::debug!(endpoint, %status, %error, "Request failed");
    Err(error)
}

pub(crate) async fn receive<T: DeserializeOwned>(
    request: RequestBuilder,
    endpoint: &str,
) -> Result<T, ApiError> {
    send(request, endpoint)
        .await?
        .json::<T>()
        .await
        .map_err(|source| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })
}

/// A client for one security server's admin API.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
}

impl AdminClient {
    /// Create a new client for the API rooted at `base`, e.g. `https://ss1:4000/api/v1`.
    pub fn new(base: &str, api_key: &str, tls: &TlsPolicy) -> Result<Self, ApiError> {
        let base = Url::parse(base)?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization_value(api_key)?);
        let http = tls.http_client(headers)?;
        Ok(Self { http, base })
    }

    /// The API base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<(RequestBuilder, String), ApiError> {
        let url = endpoint_url(&self.base, segments)?;
        let endpoint = format!("{method} {}", url.path());
        tracing::trace!(%endpoint, "Preparing request");
        Ok((self.http.request(method, url), endpoint))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let (request, endpoint) = self.request(Method::GET, segments)?;
        receive(request, &endpoint).await
    }

    async fn put_empty(&self, segments: &[&str]) -> Result<(), ApiError> {
        let (request, endpoint) = self.request(Method::PUT, segments)?;
        send(request, &endpoint).await.map(|_| ())
    }

    async fn with_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        let (request, endpoint) = self.request(method, segments)?;
        receive(request.json(body), &endpoint).await
    }

    async fn upload<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: Vec<u8>,
    ) -> Result<T, ApiError> {
        let (request, endpoint) = self.request(Method::POST, segments)?;
        let request = request.header(CONTENT_TYPE, OCTET_STREAM).body(body);
        receive(request, &endpoint).await
    }

    /// Search for clients by natural key.
    ///
    /// The server's search is not an exact match (omitting the subsystem code returns the
    /// member and all its subsystems), so callers should filter the result with
    /// [`crate::probe::find_client`].
    pub async fn find_clients(&self, key: &ClientKey) -> Result<Vec<Client>, ApiError> {
        let (request, endpoint) = self.request(Method::GET, &["clients"])?;
        let mut query = vec![
            ("member_class", key.member_class.as_str()),
            ("member_code", key.member_code.as_str()),
        ];
        if let Some(subsystem_code) = &key.subsystem_code {
            query.push(("subsystem_code", subsystem_code.as_str()));
        }
        receive(request.query(&query), &endpoint).await
    }

    pub async fn add_client(&self, client: Client) -> Result<Client, ApiError> {
        let body = ClientAdd {
            client,
            ignore_warnings: true,
        };
        self.with_json(Method::POST, &["clients"], &body).await
    }

    pub async fn register_client(&self, id: &str) -> Result<(), ApiError> {
        self.put_empty(&["clients", id, "register"]).await
    }

    pub async fn unregister_client(&self, id: &str) -> Result<(), ApiError> {
        self.put_empty(&["clients", id, "unregister"]).await
    }

    pub async fn update_client(
        &self,
        id: &str,
        connection_type: ConnectionType,
    ) -> Result<Client, ApiError> {
        let body = ConnectionTypeWrapper { connection_type };
        self.with_json(Method::PATCH, &["clients", id], &body).await
    }

    pub async fn client_tls_certificates(
        &self,
        id: &str,
    ) -> Result<Vec<CertificateDetails>, ApiError> {
        self.get(&["clients", id, "tls-certificates"]).await
    }

    /// Trust a DER-encoded TLS certificate for the client's information systems.
    pub async fn add_client_tls_certificate(
        &self,
        id: &str,
        certificate: Vec<u8>,
    ) -> Result<CertificateDetails, ApiError> {
        self.upload(&["clients", id, "tls-certificates"], certificate)
            .await
    }

    pub async fn service_descriptions(
        &self,
        client_id: &str,
    ) -> Result<Vec<ServiceDescription>, ApiError> {
        self.get(&["clients", client_id, "service-descriptions"])
            .await
    }

    pub async fn add_service_description(
        &self,
        client_id: &str,
        description: &ServiceDescriptionAdd,
    ) -> Result<ServiceDescription, ApiError> {
        self.with_json(
            Method::POST,
            &["clients", client_id, "service-descriptions"],
            description,
        )
        .await
    }

    pub async fn enable_service_description(&self, id: &str) -> Result<(), ApiError> {
        self.put_empty(&["service-descriptions", id, "enable"])
            .await
    }

    pub async fn service_clients(&self, service_id: &str) -> Result<Vec<ServiceClient>, ApiError> {
        self.get(&["services", service_id, "service-clients"]).await
    }

    pub async fn add_service_clients(
        &self,
        service_id: &str,
        items: Vec<ServiceClient>,
    ) -> Result<Vec<ServiceClient>, ApiError> {
        let body = ServiceClients { items };
        self.with_json(
            Method::POST,
            &["services", service_id, "service-clients"],
            &body,
        )
        .await
    }

    pub async fn update_service(
        &self,
        service_id: &str,
        update: &ServiceUpdate,
    ) -> Result<Service, ApiError> {
        self.with_json(Method::PATCH, &["services", service_id], update)
            .await
    }

    pub async fn token(&self, id: &str) -> Result<Token, ApiError> {
        self.get(&["tokens", id]).await
    }

    /// Import a DER-encoded sign or auth certificate into the token holding its key.
    pub async fn import_token_certificate(
        &self,
        certificate: Vec<u8>,
    ) -> Result<TokenCertificate, ApiError> {
        self.upload(&["token-certificates"], certificate).await
    }

    pub async fn register_token_certificate(
        &self,
        hash: &str,
        address: &str,
    ) -> Result<(), ApiError> {
        let (request, endpoint) =
            self.request(Method::PUT, &["token-certificates", hash, "register"])?;
        let body = SecurityServerAddress {
            address: address.to_string(),
        };
        send(request.json(&body), &endpoint).await.map(|_| ())
    }

    pub async fn activate_token_certificate(&self, hash: &str) -> Result<(), ApiError> {
        self.put_empty(&["token-certificates", hash, "activate"])
            .await
    }

    pub async fn possible_actions(&self, hash: &str) -> Result<Vec<PossibleAction>, ApiError> {
        self.get(&["token-certificates", hash, "possible-actions"])
            .await
    }

    /// Download a certificate signing request in DER format.
    pub async fn download_csr(&self, key_id: &str, csr_id: &str) -> Result<Vec<u8>, ApiError> {
        let (request, endpoint) = self.request(Method::GET, &["keys", key_id, "csrs", csr_id])?;
        let request = request.query(&[("csr_format", "DER")]);
        let response = send(request, &endpoint).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(body.to_vec())
    }

    /// The timestamping services approved by the central server.
    pub async fn approved_timestamping_services(
        &self,
    ) -> Result<Vec<TimestampingService>, ApiError> {
        self.get(&["timestamping-services"]).await
    }

    /// The timestamping services this security server uses.
    pub async fn configured_timestamping_services(
        &self,
    ) -> Result<Vec<TimestampingService>, ApiError> {
        self.get(&["system", "timestamping-services"]).await
    }

    pub async fn add_timestamping_service(
        &self,
        service: &TimestampingService,
    ) -> Result<TimestampingService, ApiError> {
        self.with_json(Method::POST, &["system", "timestamping-services"], service)
            .await
    }

    pub async fn initialization_status(&self) -> Result<InitializationStatus, ApiError> {
        self.get(&["initialization", "status"]).await
    }

    pub async fn upload_anchor(&self, anchor: Vec<u8>) -> Result<(), ApiError> {
        let (request, endpoint) = self.request(Method::POST, &["system", "anchor"])?;
        let request = request.header(CONTENT_TYPE, OCTET_STREAM).body(anchor);
        send(request, &endpoint).await.map(|_| ())
    }

    pub async fn initialize(&self, conf: &InitialServerConf) -> Result<(), ApiError> {
        let (request, endpoint) = self.request(Method::POST, &["initialization"])?;
        send(request.json(conf), &endpoint).await.map(|_| ())
    }
}

/// A client for the api-keys endpoint, which authenticates with HTTP basic authentication
/// rather than an API key.
#[derive(Debug, Clone)]
pub struct ApiKeyClient {
    http: reqwest::Client,
    url: Url,
    username: String,
    password: String,
}

impl ApiKeyClient {
    /// Create a client for the api-keys endpoint at `url`.
    pub fn new(
        url: &str,
        username: &str,
        password: &str,
        tls: &TlsPolicy,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            http: tls.http_client(HeaderMap::new())?,
            url: Url::parse(url)?,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Create an API key with the given roles.
    pub async fn create(&self, roles: &[String]) -> Result<ApiKey, ApiError> {
        let endpoint = format!("POST {}", self.url.path());
        let request = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .json(roles);
        receive(request, &endpoint).await
    }

    /// Revoke a previously created API key.
    pub async fn revoke(&self, id: u64) -> Result<(), ApiError> {
        let url = endpoint_url(&self.url, &[&id.to_string()])?;
        let endpoint = format!("DELETE {}", url.path());
        let request = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(&self.password));
        send(request, &endpoint).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_keeps_base_path() -> anyhow::Result<()> {
        let base = Url::parse("https://ss1:4000/api/v1")?;
        let url = endpoint_url(&base, &["clients", "DEV:GOV:1234:SUB1", "register"])?;

        assert_eq!(
            "https://ss1:4000/api/v1/clients/DEV:GOV:1234:SUB1/register",
            url.as_str()
        );
        Ok(())
    }

    #[test]
    fn endpoint_url_with_trailing_slash() -> anyhow::Result<()> {
        let base = Url::parse("https://ss1:4000/api/v1/")?;
        let url = endpoint_url(&base, &["tokens", "0"])?;

        assert_eq!("https://ss1:4000/api/v1/tokens/0", url.as_str());
        Ok(())
    }

    #[test]
    fn endpoint_url_encodes_segments() -> anyhow::Result<()> {
        let base = Url::parse("https://ss1:4000/api/v1")?;
        let url = endpoint_url(&base, &["services", "a/b c"])?;

        assert_eq!("https://ss1:4000/api/v1/services/a%2Fb%20c", url.as_str());
        Ok(())
    }

    #[test]
    fn authorization_prefix_is_optional() -> anyhow::Result<()> {
        let bare = authorization_value("abc")?;
        let prefixed = authorization_value("X-Road-apikey token=abc")?;

        assert_eq!(bare, prefixed);
        assert_eq!("X-Road-apikey token=abc", bare.to_str()?);
        Ok(())
    }
}
