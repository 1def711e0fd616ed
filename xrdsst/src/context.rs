// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The per-run context.
//!
//! A [`RunContext`] is built once per invocation. It holds a [`Target`] for every configured
//! security server with the API key to use for it, so operations never need to consult shared
//! state to authenticate. API keys created while building the context are revoked by
//! [`RunContext::close`].

use crate::{
    api::{AdminClient, ApiKeyClient, TlsPolicy},
    config::{ApiKeyCreation, Config, SecurityServer, API_KEY_PREFIX},
    error::{ApiError, CredentialsError},
};

/// An API key created for the duration of a run.
#[derive(Debug)]
struct IssuedKey {
    id: u64,
    issuer: ApiKeyClient,
}

/// One remote admin endpoint and the credentials to use with it.
#[derive(Debug)]
pub struct Target {
    pub name: String,
    pub url: String,
    pub tls: TlsPolicy,
    credentials: Result<String, CredentialsError>,
    issued: Option<IssuedKey>,
}

impl Target {
    /// The resolved API key, or the reason none is available.
    pub fn credentials(&self) -> Result<&str, &CredentialsError> {
        self.credentials.as_deref()
    }

    /// Returns true if the API key was created for this run.
    pub fn has_issued_key(&self) -> bool {
        self.issued.is_some()
    }

    /// Create an admin API client for this target.
    ///
    /// An unresolved key is reported as an [`ApiError::LocalFile`] naming the `api_key` setting;
    /// check [`Target::credentials`] first to report it properly.
    pub fn admin_client(&self) -> Result<AdminClient, ApiError> {
        let api_key = self
            .credentials
            .as_deref()
            .map_err(|error| ApiError::LocalFile {
                path: "api_key".to_string(),
                reason: error.to_string(),
            })?;
        AdminClient::new(&self.url, api_key, &self.tls)
    }
}

/// The explicitly configured API key, ignoring empty values and the documented placeholder.
fn configured_key(server: &SecurityServer) -> Option<&str> {
    let key = server.api_key.as_deref()?.trim();
    let token = key.strip_prefix(API_KEY_PREFIX).unwrap_or(key);
    if token.is_empty() || token == "<API_KEY>" {
        None
    } else {
        Some(key)
    }
}

/// Everything an operation needs to talk to the configured servers.
#[derive(Debug)]
pub struct RunContext {
    config: Config,
    targets: Vec<Target>,
}

impl RunContext {
    /// Build the context, resolving credentials for every configured server.
    ///
    /// Credentials are resolved in order: the server's `api_key`, then a key created through the
    /// api-keys endpoint with the document's `api_key` section. A server for which neither works
    /// keeps the reason in its [`Target`]; this never fails the whole run.
    pub async fn new(config: Config) -> Self {
        let mut context = Self::unresolved(config);
        context.resolve().await;
        context
    }

    /// Build the context without resolving credentials; every target reports
    /// [`CredentialsError::Missing`] until [`RunContext::resolve`] runs.
    pub fn unresolved(config: Config) -> Self {
        let targets = config
            .security_server
            .iter()
            .map(|server| Target {
                name: server.name.clone(),
                url: server.url.clone(),
                tls: TlsPolicy {
                    verify: server.tls_verify,
                    ca_certificate: None,
                },
                credentials: Err(CredentialsError::Missing),
                issued: None,
            })
            .collect();
        Self { config, targets }
    }

    /// Resolve credentials for every target, one server at a time.
    ///
    /// Each created key is stored in its target as soon as the server returns it, so if this
    /// future is dropped part way through, [`RunContext::close`] still revokes the keys created
    /// so far.
    pub async fn resolve(&mut self) {
        let creation = self.config.api_key.as_ref();
        for (server, target) in self.config.security_server.iter().zip(&mut self.targets) {
            Self::resolve_target(creation, server, target).await;
        }
    }

    async fn resolve_target(
        creation: Option<&ApiKeyCreation>,
        server: &SecurityServer,
        target: &mut Target,
    ) {
        match TlsPolicy::load(server).await {
            Ok(tls) => target.tls = tls,
            Err(error) => {
                tracing::error!(server = server.name, %error, "Failed to load the CA certificate");
                target.credentials = Err(CredentialsError::CaCertificate(error));
                return;
            }
        }

        if let Some(key) = configured_key(server) {
            target.credentials = Ok(key.to_string());
            return;
        }
        let Some(creation) = creation else {
            target.credentials = Err(CredentialsError::Missing);
            return;
        };
        let Some((username, password)) = creation.credentials.split_once(':') else {
            target.credentials = Err(CredentialsError::MalformedCredentials);
            return;
        };

        let url = creation
            .url
            .clone()
            .unwrap_or_else(|| format!("{}/api-keys", server.url.trim_end_matches('/')));
        let issuer = match ApiKeyClient::new(&url, username, password, &target.tls) {
            Ok(issuer) => issuer,
            Err(error) => {
                tracing::error!(server = server.name, %error, "Failed to create an API key");
                target.credentials = Err(CredentialsError::Creation(error));
                return;
            }
        };
        match issuer.create(&creation.roles).await {
            Ok(key) => {
                tracing::info!(
                    server = server.name,
                    key_id = key.id,
                    roles = ?key.roles,
                    "Created an API key for this run"
                );
                target.credentials = Ok(key.key);
                target.issued = Some(IssuedKey { id: key.id, issuer });
            }
            Err(error) => {
                tracing::error!(server = server.name, %error, "Failed to create an API key");
                target.credentials = Err(CredentialsError::Creation(error));
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Each configured server paired with its target, in document order.
    pub fn servers(&self) -> impl Iterator<Item = (&SecurityServer, &Target)> {
        self.config.security_server.iter().zip(self.targets.iter())
    }

    /// Look up a server and its target by name.
    pub fn server(&self, name: &str) -> Option<(&SecurityServer, &Target)> {
        self.servers().find(|(server, _)| server.name == name)
    }

    /// Revoke the API keys created for this run.
    ///
    /// Failures are logged; a key that can't be revoked doesn't change the run's outcome.
    pub async fn close(self) {
        for target in self.targets {
            let Some(issued) = target.issued else {
                continue;
            };
            match issued.issuer.revoke(issued.id).await {
                Ok(()) => tracing::info!(
                    server = target.name,
                    key_id = issued.id,
                    "Revoked the API key created for this run"
                ),
                Err(error) => tracing::warn!(
                    server = target.name,
                    key_id = issued.id,
                    %error,
                    "Failed to revoke the API key created for this run"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn document(url: &str, api_key: Option<&str>, creation: Option<&str>) -> Result<Config> {
        let mut document = String::new();
        if let Some(creation) = creation {
            document.push_str(creation);
        }
        document.push_str(&format!("security_server:\n  - name: ss1\n    url: {url}\n"));
        if let Some(api_key) = api_key {
            document.push_str(&format!("    api_key: \"{api_key}\"\n"));
        }
        Ok(document.parse()?)
    }

    #[tokio::test]
    async fn explicit_key_is_used() -> Result<()> {
        let config = document("https://ss1:4000/api/v1", Some("abc"), None)?;
        let context = RunContext::new(config).await;

        let (_, target) = context.server("ss1").expect("server is configured");
        assert_eq!(Ok("abc"), target.credentials().map_err(|e| e.to_string()));
        assert!(!target.has_issued_key());
        Ok(())
    }

    #[tokio::test]
    async fn placeholder_without_creation_is_missing() -> Result<()> {
        let config = document(
            "https://ss1:4000/api/v1",
            Some("X-Road-apikey token=<API_KEY>"),
            None,
        )?;
        let context = RunContext::new(config).await;

        let target = &context.targets()[0];
        assert!(matches!(
            target.credentials(),
            Err(CredentialsError::Missing)
        ));
        assert!(target.admin_client().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unresolved_context_makes_no_calls() -> Result<()> {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/api-keys");
                then.status(200);
            })
            .await;
        let creation = "api_key:\n  credentials: admin:secret\n  roles: [XROAD_SYSTEM_ADMINISTRATOR]\n";
        let config = document(&server.url("/api/v1"), Some("abc"), Some(creation))?;

        let context = RunContext::unresolved(config);

        assert!(matches!(
            context.targets()[0].credentials(),
            Err(CredentialsError::Missing)
        ));
        context.close().await;
        create.assert_hits_async(0).await;
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_ca_certificate_is_kept_per_server() -> Result<()> {
        let mut config = document("https://ss1:4000/api/v1", Some("abc"), None)?;
        config.security_server[0].tls_verify = true;
        config.security_server[0].ca_certificate = Some("/nonexistent/ca.pem".into());

        let context = RunContext::new(config).await;

        assert!(matches!(
            context.targets()[0].credentials(),
            Err(CredentialsError::CaCertificate(ApiError::LocalFile { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_credentials() -> Result<()> {
        let creation = "api_key:\n  credentials: nocolon\n  roles: [XROAD_SYSTEM_ADMINISTRATOR]\n";
        let config = document("https://ss1:4000/api/v1", None, Some(creation))?;
        let context = RunContext::new(config).await;

        assert!(matches!(
            context.targets()[0].credentials(),
            Err(CredentialsError::MalformedCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn created_key_is_revoked_on_close() -> Result<()> {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/api-keys")
                    .header_exists("authorization")
                    .json_body(json!(["XROAD_SYSTEM_ADMINISTRATOR"]));
                then.status(200).json_body(json!({
                    "id": 7,
                    "key": "created-key",
                    "roles": ["XROAD_SYSTEM_ADMINISTRATOR"],
                }));
            })
            .await;
        let revoke = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/api/v1/api-keys/7");
                then.status(200);
            })
            .await;

        let creation = "api_key:\n  credentials: admin:secret\n  roles: [XROAD_SYSTEM_ADMINISTRATOR]\n";
        let config = document(&server.url("/api/v1"), None, Some(creation))?;
        let context = RunContext::new(config).await;

        let target = &context.targets()[0];
        assert_eq!(
            Ok("created-key"),
            target.credentials().map_err(|e| e.to_string())
        );
        assert!(target.has_issued_key());
        create.assert_async().await;

        context.close().await;
        revoke.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn creation_failure_is_kept_per_server() -> Result<()> {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/api-keys");
                then.status(401);
            })
            .await;

        let creation = "api_key:\n  credentials: admin:wrong\n  roles: [XROAD_SYSTEM_ADMINISTRATOR]\n";
        let config = document(&server.url("/api/v1"), None, Some(creation))?;
        let context = RunContext::new(config).await;

        assert!(matches!(
            context.targets()[0].credentials(),
            Err(CredentialsError::Creation(ApiError::Remote { status: 401, .. }))
        ));
        create.assert_async().await;
        Ok(())
    }
}
