// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Client subsystems: add, register, connection type, and TLS certificates.

use std::path::PathBuf;

use super::{cert::load_certificate, connect, service, Flow, ServerRun, Step};
use crate::{
    api::{Client, ClientStatus},
    config::{ClientConfig, ClientKey},
    context::RunContext,
    error::ConfigError,
    probe::{self, Probe},
    report::{Outcome, Report, Status},
};

/// Find the remote client for `key`, recording why if there isn't exactly one.
pub(crate) async fn locate(
    run: &mut ServerRun<'_>,
    key: &ClientKey,
    step: Step,
) -> Option<Client> {
    match probe::client(&run.api, key).await {
        Ok(Probe::Found(client)) => Some(client),
        Ok(Probe::NotFound) => {
            run.record(
                key.to_string(),
                step,
                Status::NotFound,
                "no client matches this key",
            );
            None
        }
        Ok(Probe::Ambiguous(count)) => {
            run.ambiguous(key.to_string(), step, count);
            None
        }
        Err(error) => {
            run.failed(key.to_string(), step, error);
            None
        }
    }
}

// The server always reports identifiers for existing clients, but the field is optional on the
// wire since it's absent in requests.
fn remote_id(run: &mut ServerRun<'_>, client: &Client, step: Step) -> Option<String> {
    let id = client.id.clone();
    if id.is_none() {
        run.record(
            client.key().to_string(),
            step,
            Status::Failed,
            "the server did not report an identifier for the client",
        );
    }
    id
}

/// Run the requested client and service description steps for one configured client.
pub(crate) async fn converge(run: &mut ServerRun<'_>, client: &ClientConfig, steps: &[Step]) {
    let policies = [
        Step::ClientAdd,
        Step::ClientRegister,
        Step::ClientUpdate,
        Step::ClientImportTls,
    ];
    for step in policies.into_iter().filter(|step| steps.contains(step)) {
        let flow = match step {
            Step::ClientAdd => add(run, client).await,
            Step::ClientRegister => register(run, client).await,
            Step::ClientUpdate => update(run, client).await,
            Step::ClientImportTls => {
                import_tls(run, &client.key(), &client.tls_certificates).await
            }
            _ => Flow::Continue,
        };
        if flow == Flow::Abandon || run.is_unreachable() {
            return;
        }
    }

    let description_steps: Vec<Step> = steps
        .iter()
        .copied()
        .filter(Step::is_description_level)
        .collect();
    let Some(&first) = description_steps.first() else {
        return;
    };
    if client.service_descriptions.is_empty() {
        return;
    }
    let Some(remote) = locate(run, &client.key(), first).await else {
        return;
    };
    for description in &client.service_descriptions {
        service::converge(run, client, &remote, description, &description_steps).await;
        if run.is_unreachable() {
            return;
        }
    }
}

/// Add the client unless a client with the same key exists.
pub(crate) async fn add(run: &mut ServerRun<'_>, client: &ClientConfig) -> Flow {
    let key = client.key();
    let entity = key.to_string();
    match probe::client(&run.api, &key).await {
        Ok(Probe::Found(existing)) => {
            run.record(
                entity,
                Step::ClientAdd,
                Status::AlreadySatisfied,
                existing.id_or_key(),
            );
            return Flow::Continue;
        }
        Ok(Probe::Ambiguous(count)) => {
            run.ambiguous(entity, Step::ClientAdd, count);
            return Flow::Abandon;
        }
        Ok(Probe::NotFound) => {}
        Err(error) => {
            run.failed(entity, Step::ClientAdd, error);
            return Flow::Abandon;
        }
    }

    let desired = Client {
        id: None,
        instance_id: None,
        member_class: client.member_class.clone(),
        member_code: client.member_code.clone(),
        member_name: Some(client.member_name.clone()),
        subsystem_code: client.subsystem_code.clone(),
        owner: false,
        has_valid_local_sign_cert: false,
        connection_type: Some(client.connection_type),
        status: None,
    };
    match run.api.add_client(desired).await {
        Ok(created) => {
            run.record(
                entity,
                Step::ClientAdd,
                Status::Created,
                created.id_or_key(),
            );
            Flow::Continue
        }
        Err(error) if error.is_conflict() => {
            run.record(
                entity,
                Step::ClientAdd,
                Status::AlreadySatisfied,
                error.to_string(),
            );
            Flow::Continue
        }
        Err(error) => {
            run.failed(entity, Step::ClientAdd, error);
            Flow::Abandon
        }
    }
}

/// Submit a registration request for a client in the `SAVED` state.
pub(crate) async fn register(run: &mut ServerRun<'_>, client: &ClientConfig) -> Flow {
    let key = client.key();
    let Some(remote) = locate(run, &key, Step::ClientRegister).await else {
        return Flow::Abandon;
    };
    let entity = key.to_string();

    match remote.status {
        Some(ClientStatus::Saved) => {}
        Some(ClientStatus::Registered | ClientStatus::RegistrationInProgress) => {
            run.record(
                entity,
                Step::ClientRegister,
                Status::AlreadySatisfied,
                status_name(remote.status),
            );
            return Flow::Continue;
        }
        other => {
            run.record(
                entity,
                Step::ClientRegister,
                Status::Skipped,
                format!("client status is {}", status_name(other)),
            );
            return Flow::Continue;
        }
    }

    let Some(id) = remote_id(run, &remote, Step::ClientRegister) else {
        return Flow::Abandon;
    };
    match run.api.register_client(&id).await {
        Ok(()) => {
            run.record(entity, Step::ClientRegister, Status::Registered, id);
            Flow::Continue
        }
        Err(error) if error.is_conflict() => {
            run.record(
                entity,
                Step::ClientRegister,
                Status::AlreadySatisfied,
                error.to_string(),
            );
            Flow::Continue
        }
        Err(error) => {
            run.failed(entity, Step::ClientRegister, error);
            Flow::Abandon
        }
    }
}

/// Set the client's connection type if it differs from the configured one.
pub(crate) async fn update(run: &mut ServerRun<'_>, client: &ClientConfig) -> Flow {
    let key = client.key();
    let Some(remote) = locate(run, &key, Step::ClientUpdate).await else {
        return Flow::Abandon;
    };
    let entity = key.to_string();

    if !matches!(
        remote.status,
        Some(
            ClientStatus::Saved | ClientStatus::Registered | ClientStatus::RegistrationInProgress
        )
    ) {
        run.record(
            entity,
            Step::ClientUpdate,
            Status::Skipped,
            format!("client status is {}", status_name(remote.status)),
        );
        return Flow::Continue;
    }
    if remote.connection_type == Some(client.connection_type) {
        run.record(
            entity,
            Step::ClientUpdate,
            Status::AlreadySatisfied,
            client.connection_type.to_string(),
        );
        return Flow::Continue;
    }

    let Some(id) = remote_id(run, &remote, Step::ClientUpdate) else {
        return Flow::Abandon;
    };
    match run.api.update_client(&id, client.connection_type).await {
        Ok(_) => {
            run.record(
                entity,
                Step::ClientUpdate,
                Status::Updated,
                client.connection_type.to_string(),
            );
            Flow::Continue
        }
        Err(error) if error.is_conflict() => {
            run.record(
                entity,
                Step::ClientUpdate,
                Status::AlreadySatisfied,
                error.to_string(),
            );
            Flow::Continue
        }
        Err(error) => {
            run.failed(entity, Step::ClientUpdate, error);
            Flow::Abandon
        }
    }
}

/// Import the server-level TLS certificates for the owner member.
pub(crate) async fn import_owner_tls(run: &mut ServerRun<'_>) {
    let server = run.server;
    if server.tls_certificates.is_empty() {
        return;
    }
    match server.owner_key() {
        Some(owner) => {
            import_tls(run, &owner, &server.tls_certificates).await;
        }
        None => {
            let error = ConfigError::MissingKeys {
                server: server.name.clone(),
                keys: server
                    .missing_owner_keys()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            };
            run.record(
                "owner",
                Step::ClientImportTls,
                Status::ConfigInvalid,
                error.to_string(),
            );
        }
    }
}

/// Trust the given TLS certificates for the client's information systems.
pub(crate) async fn import_tls(
    run: &mut ServerRun<'_>,
    key: &ClientKey,
    certificates: &[PathBuf],
) -> Flow {
    if certificates.is_empty() {
        return Flow::Continue;
    }
    let Some(remote) = locate(run, key, Step::ClientImportTls).await else {
        return Flow::Abandon;
    };
    let Some(id) = remote_id(run, &remote, Step::ClientImportTls) else {
        return Flow::Abandon;
    };
    let present = match run.api.client_tls_certificates(&id).await {
        Ok(present) => present,
        Err(error) => {
            run.failed(key.to_string(), Step::ClientImportTls, error);
            return Flow::Abandon;
        }
    };

    for path in certificates {
        let entity = format!("{key} {}", path.display());
        let certificate = match load_certificate(path).await {
            Ok(certificate) => certificate,
            Err(error) => {
                run.failed(entity, Step::ClientImportTls, error);
                continue;
            }
        };
        if present
            .iter()
            .any(|details| details.hash.eq_ignore_ascii_case(&certificate.hash))
        {
            run.record(
                entity,
                Step::ClientImportTls,
                Status::AlreadySatisfied,
                certificate.hash,
            );
            continue;
        }

        match run.api.add_client_tls_certificate(&id, certificate.der).await {
            Ok(added) => run.record(entity, Step::ClientImportTls, Status::Imported, added.hash),
            Err(error) if error.is_conflict() => run.record(
                entity,
                Step::ClientImportTls,
                Status::AlreadySatisfied,
                certificate.hash,
            ),
            Err(error) => {
                run.failed(entity, Step::ClientImportTls, error);
                if run.is_unreachable() {
                    return Flow::Abandon;
                }
            }
        }
    }
    Flow::Continue
}

/// Unregister clients by their server-assigned identifiers.
///
/// Unlike the other client steps this acts on identifiers given by the operator, since
/// unregistration is not part of the desired state.
pub async fn unregister(
    context: &RunContext,
    server_name: &str,
    client_ids: &[String],
) -> Report {
    let Some((server, target)) = context.server(server_name) else {
        tracing::error!(server = server_name, "No such security server in the configuration");
        let mut report = Report::new();
        report.push(Outcome {
            server: server_name.to_string(),
            entity: server_name.to_string(),
            action: Step::ClientUnregister,
            status: Status::ConfigInvalid,
            detail: "no security server with this name is configured".to_string(),
        });
        return report;
    };
    let api = match connect(server, target) {
        Ok(api) => api,
        Err(report) => return report,
    };

    let mut run = ServerRun::new(server, api);
    for id in client_ids {
        match run.api.unregister_client(id).await {
            Ok(()) => run.record(id.clone(), Step::ClientUnregister, Status::Unregistered, ""),
            Err(error) if error.is_conflict() => run.record(
                id.clone(),
                Step::ClientUnregister,
                Status::AlreadySatisfied,
                error.to_string(),
            ),
            Err(error) => {
                run.failed(id.clone(), Step::ClientUnregister, error);
                if run.is_unreachable() {
                    break;
                }
            }
        }
    }
    run.finish()
}

fn status_name(status: Option<ClientStatus>) -> String {
    status.map_or_else(|| "unknown".to_string(), |status| status.to_string())
}
