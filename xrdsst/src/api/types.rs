// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Request and response documents of the admin API.
//!
//! Only the fields the toolkit reads or writes are modelled; everything else in a response is
//! ignored.

use serde::{Deserialize, Serialize};

use crate::config::{ClientKey, ConnectionType, ServiceType};

/// A client as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// The server-assigned identifier, e.g. `DEV:GOV:1234:SUB1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub member_class: String,
    pub member_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsystem_code: Option<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub has_valid_local_sign_cert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClientStatus>,
}

impl Client {
    pub fn key(&self) -> ClientKey {
        ClientKey {
            member_class: self.member_class.clone(),
            member_code: self.member_code.clone(),
            subsystem_code: self.subsystem_code.clone(),
        }
    }

    /// The identifier, falling back to the natural key if the server omitted it.
    pub fn id_or_key(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.key().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    Registered,
    Saved,
    GlobalError,
    RegistrationInProgress,
    DeletionInProgress,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientStatus::Registered => "REGISTERED",
            ClientStatus::Saved => "SAVED",
            ClientStatus::GlobalError => "GLOBAL_ERROR",
            ClientStatus::RegistrationInProgress => "REGISTRATION_IN_PROGRESS",
            ClientStatus::DeletionInProgress => "DELETION_IN_PROGRESS",
            ClientStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// The request body of `POST /clients`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientAdd {
    pub client: Client,
    pub ignore_warnings: bool,
}

/// The request body of `PATCH /clients/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTypeWrapper {
    pub connection_type: ConnectionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// The request body of `POST /clients/{id}/service-descriptions`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptionAdd {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_service_code: Option<String>,
    pub ignore_warnings: bool,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub service_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_service_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_auth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The request body of `PATCH /services/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUpdate {
    pub url: Option<String>,
    pub timeout: Option<u32>,
    pub ssl_auth: Option<bool>,
    pub url_all: bool,
    pub timeout_all: bool,
    pub ssl_auth_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub service_client_type: ServiceClientType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceClientType {
    GlobalGroup,
    LocalGroup,
    Subsystem,
}

/// The request body of `POST /services/{id}/service-clients`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceClients {
    pub items: Vec<ServiceClient>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Key {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub usage: Option<KeyUsage>,
    #[serde(default)]
    pub certificates: Vec<TokenCertificate>,
    #[serde(default)]
    pub certificate_signing_requests: Vec<CertificateSigningRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyUsage {
    Authentication,
    Signing,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenCertificate {
    pub certificate_details: CertificateDetails,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub possible_actions: Vec<PossibleAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateDetails {
    pub hash: String,
    #[serde(default)]
    pub subject_distinguished_name: Option<String>,
}

/// Actions the server allows on a certificate in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PossibleAction {
    Delete,
    Activate,
    Disable,
    Register,
    Unregister,
    ImportFromToken,
    GenerateAuthCsr,
    GenerateSignCsr,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for PossibleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PossibleAction::Delete => "DELETE",
            PossibleAction::Activate => "ACTIVATE",
            PossibleAction::Disable => "DISABLE",
            PossibleAction::Register => "REGISTER",
            PossibleAction::Unregister => "UNREGISTER",
            PossibleAction::ImportFromToken => "IMPORT_FROM_TOKEN",
            PossibleAction::GenerateAuthCsr => "GENERATE_AUTH_CSR",
            PossibleAction::GenerateSignCsr => "GENERATE_SIGN_CSR",
            PossibleAction::Other => "OTHER",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateSigningRequest {
    pub id: String,
}

/// The request body of `PUT /token-certificates/{hash}/register`.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityServerAddress {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampingService {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitializationStatus {
    #[serde(default)]
    pub is_anchor_imported: bool,
    #[serde(default)]
    pub is_server_code_initialized: bool,
    #[serde(default)]
    pub is_server_owner_initialized: bool,
    #[serde(default)]
    pub software_token_init_status: Option<String>,
}

/// The request body of `POST /initialization`.
#[derive(Debug, Clone, Serialize)]
pub struct InitialServerConf {
    pub owner_member_class: String,
    pub owner_member_code: String,
    pub security_server_code: String,
    pub software_token_pin: String,
    pub ignore_warnings: bool,
}

/// The response of `POST /api-keys`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub id: u64,
    pub key: String,
    #[serde(default)]
    pub roles: Vec<String>,
}
