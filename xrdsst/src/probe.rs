// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Read-only lookups of remote entities by natural key.
//!
//! The admin API's search endpoints are not exact, and server-assigned identifiers aren't known
//! until an entity exists, so every lookup fetches candidates and narrows them down locally.
//! Zero matches, one match, and several matches are distinct outcomes: an ambiguous match must
//! never lead to a mutating call.

use crate::{
    api::{
        AdminClient, Client, Key, PossibleAction, ServiceClient, ServiceDescription, Token,
        TokenCertificate,
    },
    config::{ClientKey, ServiceType},
    error::ApiError,
};

/// The result of matching remote entities against a natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Exactly one entity matched.
    Found(T),
    NotFound,
    /// The given number of entities (always more than one) matched.
    Ambiguous(usize),
}

impl<T> Probe<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Probe::Found(value) => Probe::Found(f(value)),
            Probe::NotFound => Probe::NotFound,
            Probe::Ambiguous(count) => Probe::Ambiguous(count),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Classify the candidates that matched a natural key.
pub fn probe_one<T>(matches: impl IntoIterator<Item = T>) -> Probe<T> {
    let mut matches = matches.into_iter();
    match (matches.next(), matches.next()) {
        (None, _) => Probe::NotFound,
        (Some(only), None) => Probe::Found(only),
        (Some(_), Some(_)) => Probe::Ambiguous(2 + matches.count()),
    }
}

/// Select the client whose natural key equals `key`.
///
/// A key without a subsystem code matches only the member itself, not its subsystems.
pub fn find_client(candidates: Vec<Client>, key: &ClientKey) -> Probe<Client> {
    probe_one(candidates.into_iter().filter(|client| {
        client.member_class == key.member_class
            && client.member_code == key.member_code
            && client.subsystem_code == key.subsystem_code
    }))
}

/// Query the server for clients and select the one matching `key`.
pub async fn client(api: &AdminClient, key: &ClientKey) -> Result<Probe<Client>, ApiError> {
    let candidates = api.find_clients(key).await?;
    Ok(find_client(candidates, key))
}

/// Select the service description with the given URL and type.
pub fn find_service_description(
    candidates: Vec<ServiceDescription>,
    url: &str,
    service_type: ServiceType,
) -> Probe<ServiceDescription> {
    probe_one(candidates.into_iter().filter(|description| {
        description.url == url && description.service_type == service_type
    }))
}

/// Select the key with the given label from a token.
pub fn find_key<'a>(token: &'a Token, label: &str) -> Probe<&'a Key> {
    probe_one(
        token
            .keys
            .iter()
            .filter(|key| key.label.as_deref() == Some(label)),
    )
}

/// Select the key certificate on which `action` is currently possible.
pub fn find_actionable_certificate(
    key: &Key,
    action: PossibleAction,
) -> Probe<&TokenCertificate> {
    probe_one(
        key.certificates
            .iter()
            .filter(|certificate| certificate.possible_actions.contains(&action)),
    )
}

/// Returns true if a certificate with the given SHA-1 hash is present on any key of the token.
pub fn token_has_certificate(token: &Token, hash: &str) -> bool {
    token
        .keys
        .iter()
        .flat_map(|key| key.certificates.iter())
        .any(|certificate| {
            certificate
                .certificate_details
                .hash
                .eq_ignore_ascii_case(hash)
        })
}

/// Returns true if the service client with the given identifier is already present.
pub fn has_service_client(service_clients: &[ServiceClient], id: &str) -> bool {
    service_clients.iter().any(|client| client.id == id)
}
