// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The configuration document describing the desired state of each security server.
//!
//! Enumerated settings are closed types and unknown keys are rejected, so a document that loads
//! successfully never causes a remote call to fail on a misspelled value.

use std::{
    collections::HashSet,
    env, fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{converge::Step, error::ConfigError};

/// The prefix of the authorization header value the admin API expects.
pub const API_KEY_PREFIX: &str = "X-Road-apikey token=";

/// The root of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optionally mirror log output to a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,

    /// How to obtain API keys for servers that don't have one configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKeyCreation>,

    /// The security servers to configure, processed in order.
    #[serde(default)]
    pub security_server: Vec<SecurityServer>,
}

/// Log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    pub file: PathBuf,
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Settings for creating API keys at the start of a run.
///
/// Keys created this way are revoked when the run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyCreation {
    /// Basic authentication credentials in the form `user:password`.
    pub credentials: String,
    /// The roles to grant the created key.
    pub roles: Vec<String>,
    /// The api-keys endpoint. Defaults to `<security server url>/api-keys`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One security server and its desired state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityServer {
    /// The name used in log messages and conventional key labels.
    pub name: String,
    /// The admin API base URL, for example `https://ss1:4000/api/v1`.
    pub url: String,
    /// The API key to authenticate with. The `X-Road-apikey token=` prefix is optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Verify the server's TLS certificate. Security servers ship with self-signed
    /// certificates, so this is off by default.
    #[serde(default)]
    pub tls_verify: bool,
    /// An additional trusted root certificate (PEM) to use when `tls_verify` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_anchor: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_dn_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_dn_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_member_class: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_member_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_server_code: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub software_token_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub software_token_pin: Option<String>,

    /// Sign and auth certificates to import into the software token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<PathBuf>,
    /// TLS certificates of information systems to trust on behalf of the owner member.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_certificates: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<ClientConfig>,
}

impl SecurityServer {
    /// The key labels the toolkit uses for this server's authentication and signing keys.
    pub fn auth_key_label(&self) -> String {
        format!("{}-default-auth-key", self.name)
    }

    pub fn sign_key_label(&self) -> String {
        format!("{}-default-sign-key", self.name)
    }

    /// The natural key of the owner member, if the owner is configured.
    pub fn owner_key(&self) -> Option<ClientKey> {
        Some(ClientKey {
            member_class: self.owner_member_class.clone()?,
            member_code: self.owner_member_code.clone()?,
            subsystem_code: None,
        })
    }

    /// The host name or address of the server, derived from its URL.
    pub fn address(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// The owner keys missing for importing server-level TLS certificates.
    pub fn missing_owner_keys(&self) -> Vec<&'static str> {
        [
            ("owner_member_class", self.owner_member_class.is_some()),
            ("owner_member_code", self.owner_member_code.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(key, _)| key)
        .collect()
    }

    /// List the keys that must be present for the given step, in document order.
    ///
    /// Only keys that every entity the step touches depends on are listed, so a missing key
    /// never keeps a step from running for entities that don't need it.
    pub fn missing_keys(&self, step: Step) -> Vec<&'static str> {
        let required: Vec<(&'static str, bool)> = match step {
            Step::Init => vec![
                ("configuration_anchor", self.configuration_anchor.is_some()),
                ("owner_member_class", self.owner_member_class.is_some()),
                ("owner_member_code", self.owner_member_code.is_some()),
                ("security_server_code", self.security_server_code.is_some()),
                ("software_token_pin", self.software_token_pin.is_some()),
            ],
            Step::CertImport
            | Step::CertRegister
            | Step::CertActivate
            | Step::DownloadCsrs => vec![("software_token_id", self.software_token_id.is_some())],
            _ => vec![],
        };

        required
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(key, _)| key)
            .collect()
    }
}

/// The business identifier of a client, used to match configuration to remote entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientKey {
    pub member_class: String,
    pub member_code: String,
    pub subsystem_code: Option<String>,
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.member_class, self.member_code)?;
        if let Some(subsystem_code) = &self.subsystem_code {
            write!(f, ":{subsystem_code}")?;
        }
        Ok(())
    }
}

/// A client subsystem (or member) to add to a security server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub member_class: String,
    #[serde(deserialize_with = "code")]
    pub member_code: String,
    pub member_name: String,
    #[serde(
        default,
        deserialize_with = "optional_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub subsystem_code: Option<String>,
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_certificates: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_descriptions: Vec<ServiceDescriptionConfig>,
}

impl ClientConfig {
    pub fn key(&self) -> ClientKey {
        ClientKey {
            member_class: self.member_class.clone(),
            member_code: self.member_code.clone(),
            subsystem_code: self.subsystem_code.clone(),
        }
    }
}

/// How an information system connects to the security server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Http,
    Https,
    HttpsNoAuth,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Http => "HTTP",
            ConnectionType::Https => "HTTPS",
            ConnectionType::HttpsNoAuth => "HTTPS_NO_AUTH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "REST")]
    Rest,
    #[serde(rename = "WSDL")]
    Wsdl,
    #[serde(rename = "OPENAPI3")]
    OpenApi3,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceType::Rest => "REST",
            ServiceType::Wsdl => "WSDL",
            ServiceType::OpenApi3 => "OPENAPI3",
        };
        f.write_str(name)
    }
}

/// A service description to add to a client, along with access rights and parameters for the
/// services it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptionConfig {
    pub url: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_service_code: Option<String>,
    /// Subsystem codes (of the client's member) granted access to every service, unless the
    /// service overrides it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<String>,
    /// Default service timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_auth: Option<bool>,
    /// Default service endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_all: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceOverride>,
}

impl ServiceDescriptionConfig {
    pub fn service_override(&self, service_code: &str) -> Option<&ServiceOverride> {
        self.services
            .iter()
            .find(|service| service.service_code == service_code)
    }

    /// The subsystem codes that should have access to the given service.
    pub fn access_for(&self, service_code: &str) -> &[String] {
        self.service_override(service_code)
            .and_then(|service| service.access.as_deref())
            .unwrap_or(&self.access)
    }

    /// The desired parameters for the given service.
    pub fn parameters_for(&self, service_code: &str) -> ServiceParameters {
        let service = self.service_override(service_code);
        ServiceParameters {
            url: service
                .and_then(|s| s.url.clone())
                .or_else(|| self.url_all.clone()),
            timeout: service.and_then(|s| s.timeout).or(self.timeout),
            ssl_auth: service.and_then(|s| s.ssl_auth).or(self.ssl_auth),
        }
    }
}

/// Per-service settings that take precedence over the description's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceOverride {
    pub service_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_auth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The resolved parameters for one service; `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceParameters {
    pub url: Option<String>,
    pub timeout: Option<u32>,
    pub ssl_auth: Option<bool>,
}

impl ServiceParameters {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.timeout.is_none() && self.ssl_auth.is_none()
    }
}

// Member codes, token ids, and PINs are frequently numeric, and YAML will happily parse them as
// integers unless they're quoted.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Integer(i64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(value) => value,
            StringOrNumber::Integer(value) => value.to_string(),
        }
    }
}

fn code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|value| value.map(String::from))
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(document: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_yaml::from_str(document)?;
        let mut names = HashSet::new();
        for server in &config.security_server {
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: Some(Logging {
                file: PathBuf::from("/var/log/xrdsst.log"),
                level: LogLevel::Info,
            }),
            api_key: None,
            security_server: vec![SecurityServer {
                name: "ss1".to_string(),
                url: "https://ss1.example.com:4000/api/v1".to_string(),
                api_key: Some("00000000-0000-0000-0000-000000000000".to_string()),
                tls_verify: false,
                ca_certificate: None,
                configuration_anchor: Some(PathBuf::from("configuration-anchor.xml")),
                owner_dn_org: Some("ORG".to_string()),
                owner_dn_country: Some("FI".to_string()),
                owner_member_class: Some("GOV".to_string()),
                owner_member_code: Some("1234".to_string()),
                security_server_code: Some("SS1".to_string()),
                software_token_id: Some("0".to_string()),
                software_token_pin: Some("1234".to_string()),
                certificates: vec![
                    PathBuf::from("ss1-sign.pem"),
                    PathBuf::from("ss1-auth.pem"),
                ],
                tls_certificates: vec![],
                clients: vec![ClientConfig {
                    member_class: "GOV".to_string(),
                    member_code: "1234".to_string(),
                    member_name: "ORG".to_string(),
                    subsystem_code: Some("SUB1".to_string()),
                    connection_type: ConnectionType::Http,
                    tls_certificates: vec![],
                    service_descriptions: vec![ServiceDescriptionConfig {
                        url: "https://petstore.example.com/openapi.yaml".to_string(),
                        service_type: ServiceType::OpenApi3,
                        rest_service_code: Some("petstore".to_string()),
                        access: vec!["SUB1".to_string()],
                        timeout: Some(60),
                        ssl_auth: None,
                        url_all: None,
                        services: vec![],
                    }],
                }],
            }],
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_yaml::to_string(&self).unwrap_or_default())
    }
}

fn private_load_config(path: &Path) -> anyhow::Result<Config> {
    let config = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
        .with_context(|| format!("failed to read from path {path:?}"))?;
    config
        .parse::<Config>()
        .inspect_err(|error| {
            eprintln!("Failed to parse configuration loaded from {path:?}:\n{error}");
            eprintln!("Example config file:\n\n{}", Config::default());
        })
        .context("configuration file is invalid")
}

/// Load the configuration document.
///
/// If `path` is [`None`], the `default` path, relative to `$XDG_CONFIG_HOME` (or
/// `$HOME/.config`), is checked.
///
/// # Errors
///
/// Unlike most settings, there are no useful defaults for the servers to configure, so an error
/// is returned if no document is found, or if the document is invalid.
pub fn load_config(path: Option<PathBuf>, default: &Path) -> anyhow::Result<Config> {
    let path = path
        .or_else(|| {
            env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .inspect_err(|error| {
                    tracing::warn!(
                        ?error,
                        "Neither XDG_CONFIG_HOME nor HOME environment variables are readable"
                    );
                })
                .ok()
                .map(|base_path| base_path.join(default))
                .filter(|path| path.is_file())
        })
        .ok_or_else(|| {
            eprintln!("Example config file:\n\n{}", Config::default());
            anyhow::anyhow!(
                "No configuration file provided and none found at the default location ({})",
                default.display()
            )
        })?;

    tracing::info!(?path, "Attempting to load configuration");
    private_load_config(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
logging:
  file: /tmp/xrdsst.log
  level: DEBUG
security_server:
  - name: ss1
    url: https://ss1:4000/api/v1
    api_key: abc
    owner_member_class: GOV
    owner_member_code: 1234
    software_token_id: 0
    clients:
      - member_class: GOV
        member_code: 1234
        member_name: ORG
        subsystem_code: SUB1
        connection_type: HTTPS_NO_AUTH
        service_descriptions:
          - url: http://example.com/openapi.yaml
            type: OPENAPI3
            rest_service_code: pets
            access: [SUB1]
            timeout: 60
            services:
              - service_code: listPets
                access: [SUB2, SUB3]
                ssl_auth: true
"#;

    #[test]
    fn parse_document() -> anyhow::Result<()> {
        let config: Config = DOCUMENT.parse()?;

        assert_eq!(LogLevel::Debug, config.logging.as_ref().unwrap().level);
        let server = &config.security_server[0];
        assert_eq!(Some("1234"), server.owner_member_code.as_deref());
        assert_eq!(Some("0"), server.software_token_id.as_deref());
        assert_eq!(Some("ss1".to_string()), server.address());

        let client = &server.clients[0];
        assert_eq!(ConnectionType::HttpsNoAuth, client.connection_type);
        assert_eq!("GOV:1234:SUB1", client.key().to_string());

        let description = &client.service_descriptions[0];
        assert_eq!(ServiceType::OpenApi3, description.service_type);
        Ok(())
    }

    #[test]
    fn service_overrides_take_precedence() -> anyhow::Result<()> {
        let config: Config = DOCUMENT.parse()?;
        let description = &config.security_server[0].clients[0].service_descriptions[0];

        assert_eq!(["SUB2", "SUB3"], description.access_for("listPets"));
        assert_eq!(["SUB1"], description.access_for("getPet"));

        let overridden = description.parameters_for("listPets");
        assert_eq!(Some(60), overridden.timeout);
        assert_eq!(Some(true), overridden.ssl_auth);
        assert_eq!(None, overridden.url);

        let defaults = description.parameters_for("getPet");
        assert_eq!(Some(60), defaults.timeout);
        assert_eq!(None, defaults.ssl_auth);
        Ok(())
    }

    #[test]
    fn unknown_connection_type_is_rejected() {
        let document = DOCUMENT.replace("HTTPS_NO_AUTH", "CARRIER_PIGEON");
        let result = document.parse::<Config>();

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let document = DOCUMENT.replace("api_key: abc", "api_kee: abc");
        let error = document.parse::<Config>().unwrap_err();

        assert!(error.to_string().contains("api_kee"));
    }

    #[test]
    fn boolean_apply_to_all_flags_are_rejected() {
        let document = DOCUMENT.replace("            timeout: 60\n", "            timeout_all: true\n");
        let error = document.parse::<Config>().unwrap_err();

        assert!(error.to_string().contains("timeout_all"));
    }

    #[test]
    fn duplicate_server_names_are_rejected() {
        let document = r#"
security_server:
  - name: ss1
    url: https://ss1:4000/api/v1
  - name: ss1
    url: https://ss2:4000/api/v1
"#;
        let result = document.parse::<Config>();

        assert!(matches!(result, Err(ConfigError::DuplicateServer(name)) if name == "ss1"));
    }

    #[test]
    fn missing_keys_per_step() -> anyhow::Result<()> {
        let config: Config = DOCUMENT.parse()?;
        let server = &config.security_server[0];

        assert_eq!(
            vec![
                "configuration_anchor",
                "security_server_code",
                "software_token_pin"
            ],
            server.missing_keys(Step::Init)
        );
        assert!(server.missing_keys(Step::CertImport).is_empty());
        assert!(server.missing_keys(Step::ClientAdd).is_empty());
        Ok(())
    }

    #[test]
    fn owner_keys_do_not_gate_client_tls() -> anyhow::Result<()> {
        let document = DOCUMENT.replace(
            "    owner_member_class: GOV\n",
            "    tls_certificates: [owner.pem]\n",
        );
        let config: Config = document.parse()?;
        let server = &config.security_server[0];

        assert!(server.missing_keys(Step::ClientImportTls).is_empty());
        assert_eq!(vec!["owner_member_class"], server.missing_owner_keys());
        Ok(())
    }

    #[test]
    fn client_key_without_subsystem() {
        let key = ClientKey {
            member_class: "GOV".to_string(),
            member_code: "1234".to_string(),
            subsystem_code: None,
        };

        assert_eq!("GOV:1234", key.to_string());
    }

    #[test]
    fn example_round_trips() -> anyhow::Result<()> {
        let example = Config::default().to_string();
        let parsed: Config = example.parse()?;

        assert_eq!(1, parsed.security_server.len());
        assert_eq!("ss1", parsed.security_server[0].name);
        Ok(())
    }

    #[test]
    fn shipped_example_parses() -> anyhow::Result<()> {
        let example: Config = include_str!("../config/example.yaml").parse()?;
        let default = Config::default();

        assert_eq!(
            default.security_server[0].clients[0].key(),
            example.security_server[0].clients[0].key()
        );
        assert_eq!(
            default.security_server[0].certificates,
            example.security_server[0].certificates
        );
        Ok(())
    }
}
