// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Utilities for testing xrdsst: a mock of the security server admin API, fixture builders for
//! remote entities and configuration documents, and certificate generation.

use std::path::{Path, PathBuf};

use httpmock::MockServer;
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    x509::{X509Builder, X509NameBuilder, X509},
};
use serde_json::{json, Value};

/// The path the admin API is served under.
pub const API_PREFIX: &str = "/api/v1";

/// The API key every fixture document configures.
pub const API_KEY: &str = "3a1b2c3d-0000-4000-8000-000000000001";

/// The authorization header value requests made with [`API_KEY`] carry.
pub const AUTHORIZATION: &str = "X-Road-apikey token=3a1b2c3d-0000-4000-8000-000000000001";

/// The X-Road instance every fixture client belongs to.
pub const INSTANCE: &str = "DEV";

/// An HTTP mock standing in for one security server's admin API.
pub struct MockSecurityServer {
    pub name: String,
    pub mock: MockServer,
}

impl MockSecurityServer {
    pub async fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mock: MockServer::start_async().await,
        }
    }

    /// The admin API base URL, as it goes in the configuration document.
    pub fn url(&self) -> String {
        self.mock.url(API_PREFIX)
    }

    /// The full path of an admin API endpoint, for use in mock expectations.
    pub fn path(&self, endpoint: &str) -> String {
        format!("{API_PREFIX}{endpoint}")
    }

    /// A configuration entry for this server, authenticating with [`API_KEY`].
    ///
    /// Add `clients`, `certificates`, and so on to the returned mapping as the test requires.
    pub fn entry(&self) -> Value {
        server_entry(&self.name, &self.url())
    }
}

/// A configuration entry for a server that holds no desired state yet.
pub fn server_entry(name: &str, url: &str) -> Value {
    json!({
        "name": name,
        "url": url,
        "api_key": API_KEY,
        "owner_member_class": "GOV",
        "owner_member_code": "1234",
        "software_token_id": "0",
    })
}

/// A configuration entry for a client of the `GOV:1234` member.
pub fn client_entry(subsystem_code: Option<&str>) -> Value {
    let mut client = json!({
        "member_class": "GOV",
        "member_code": "1234",
        "member_name": "ORG",
        "connection_type": "HTTP",
    });
    if let Some(subsystem_code) = subsystem_code {
        client["subsystem_code"] = json!(subsystem_code);
    }
    client
}

/// A configuration entry for an OpenAPI 3 service description.
pub fn description_entry(url: &str, access: &[&str]) -> Value {
    json!({
        "url": url,
        "type": "OPENAPI3",
        "rest_service_code": "pets",
        "access": access,
    })
}

/// Render server entries as a configuration document.
pub fn document(servers: Vec<Value>) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(&json!({ "security_server": servers }))?)
}

/// The identifier the admin API assigns to a client.
pub fn client_id(member_class: &str, member_code: &str, subsystem_code: Option<&str>) -> String {
    match subsystem_code {
        Some(subsystem_code) => {
            format!("{INSTANCE}:{member_class}:{member_code}:{subsystem_code}")
        }
        None => format!("{INSTANCE}:{member_class}:{member_code}"),
    }
}

/// A client of the `GOV:1234` member as the admin API reports it.
pub fn remote_client(subsystem_code: Option<&str>, status: &str) -> Value {
    let mut client = json!({
        "id": client_id("GOV", "1234", subsystem_code),
        "instance_id": INSTANCE,
        "member_class": "GOV",
        "member_code": "1234",
        "member_name": "ORG",
        "owner": false,
        "has_valid_local_sign_cert": false,
        "connection_type": "HTTP",
        "status": status,
    });
    if let Some(subsystem_code) = subsystem_code {
        client["subsystem_code"] = json!(subsystem_code);
    }
    client
}

/// A service description as the admin API reports it, with one service per code.
pub fn remote_description(id: &str, url: &str, disabled: bool, service_codes: &[&str]) -> Value {
    let services: Vec<Value> = service_codes
        .iter()
        .map(|code| {
            json!({
                "id": format!("{id}:{code}"),
                "service_code": code,
                "full_service_code": format!("{code}.v1"),
                "timeout": 60,
                "ssl_auth": false,
                "url": url,
            })
        })
        .collect();
    json!({
        "id": id,
        "url": url,
        "type": "OPENAPI3",
        "disabled": disabled,
        "services": services,
    })
}

/// A software token with one key per `(label, certificates)` pair.
pub fn remote_token(keys: Vec<(&str, Vec<Value>)>) -> Value {
    let keys: Vec<Value> = keys
        .into_iter()
        .enumerate()
        .map(|(index, (label, certificates))| {
            json!({
                "id": format!("KEY{index}"),
                "label": label,
                "certificates": certificates,
                "certificate_signing_requests": [],
            })
        })
        .collect();
    json!({
        "id": "0",
        "name": "softToken-0",
        "logged_in": true,
        "keys": keys,
    })
}

/// A certificate on a token key, with the actions the server currently allows on it.
pub fn remote_token_certificate(hash: &str, possible_actions: &[&str]) -> Value {
    json!({
        "certificate_details": {
            "hash": hash,
            "subject_distinguished_name": "CN=test",
        },
        "status": "SAVED",
        "possible_actions": possible_actions,
    })
}

/// Generate a self-signed certificate with the given common name.
pub fn self_signed_certificate(common_name: &str) -> Result<X509, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(365)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.sign(&key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// The upper-case hex SHA-1 fingerprint the admin API identifies certificates by.
pub fn certificate_hash(certificate: &X509) -> Result<String, ErrorStack> {
    let digest = certificate.digest(MessageDigest::sha1())?;
    Ok(digest.iter().map(|byte| format!("{byte:02X}")).collect())
}

/// Write a new self-signed PEM certificate to `directory`.
///
/// Returns the path and the certificate's fingerprint.
pub fn write_certificate(
    directory: &Path,
    file_name: &str,
    common_name: &str,
) -> anyhow::Result<(PathBuf, String)> {
    let certificate = self_signed_certificate(common_name)?;
    let path = directory.join(file_name);
    std::fs::write(&path, certificate.to_pem()?)?;
    Ok((path, certificate_hash(&certificate)?))
}
