// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Service descriptions of a client, and the access rights and parameters of their services.

use super::{Flow, ServerRun, Step};
use crate::{
    api::{
        Client, Service, ServiceClient, ServiceClientType, ServiceDescription,
        ServiceDescriptionAdd, ServiceUpdate,
    },
    config::{ClientConfig, ServiceDescriptionConfig, ServiceParameters},
    probe::{self, Probe},
    report::Status,
};

/// Run the requested steps for one service description of an existing client.
pub(crate) async fn converge(
    run: &mut ServerRun<'_>,
    client: &ClientConfig,
    remote: &Client,
    description: &ServiceDescriptionConfig,
    steps: &[Step],
) {
    let Some(client_id) = remote.id.as_deref() else {
        run.record(
            client.key().to_string(),
            steps.first().copied().unwrap_or(Step::ServiceDescriptionAdd),
            Status::Failed,
            "the server did not report an identifier for the client",
        );
        return;
    };
    let entity = format!("{} {}", client.key(), description.url);

    for &step in steps {
        let flow = match step {
            Step::ServiceDescriptionAdd => add(run, client_id, &entity, description).await,
            Step::ServiceDescriptionEnable => enable(run, client_id, &entity, description).await,
            Step::ServiceAccess => access(run, remote, client_id, &entity, description).await,
            Step::ServiceParameters => parameters(run, client_id, &entity, description).await,
            _ => Flow::Continue,
        };
        if flow == Flow::Abandon || run.is_unreachable() {
            return;
        }
    }
}

/// Find the remote service description matching the configured URL and type.
async fn locate(
    run: &mut ServerRun<'_>,
    client_id: &str,
    entity: &str,
    description: &ServiceDescriptionConfig,
    step: Step,
) -> Option<ServiceDescription> {
    let candidates = match run.api.service_descriptions(client_id).await {
        Ok(candidates) => candidates,
        Err(error) => {
            run.failed(entity, step, error);
            return None;
        }
    };
    match probe::find_service_description(candidates, &description.url, description.service_type)
    {
        Probe::Found(found) => Some(found),
        Probe::NotFound => {
            run.record(
                entity,
                step,
                Status::NotFound,
                "no service description with this url and type",
            );
            None
        }
        Probe::Ambiguous(count) => {
            run.ambiguous(entity, step, count);
            None
        }
    }
}

/// Add the service description unless one with the same URL and type exists.
pub(crate) async fn add(
    run: &mut ServerRun<'_>,
    client_id: &str,
    entity: &str,
    description: &ServiceDescriptionConfig,
) -> Flow {
    let step = Step::ServiceDescriptionAdd;
    let candidates = match run.api.service_descriptions(client_id).await {
        Ok(candidates) => candidates,
        Err(error) => {
            run.failed(entity, step, error);
            return Flow::Abandon;
        }
    };
    match probe::find_service_description(candidates, &description.url, description.service_type)
    {
        Probe::Found(existing) => {
            run.record(entity, step, Status::AlreadySatisfied, existing.id);
            return Flow::Continue;
        }
        Probe::Ambiguous(count) => {
            run.ambiguous(entity, step, count);
            return Flow::Abandon;
        }
        Probe::NotFound => {}
    }

    let request = ServiceDescriptionAdd {
        url: description.url.clone(),
        rest_service_code: description.rest_service_code.clone(),
        ignore_warnings: true,
        service_type: description.service_type,
    };
    match run.api.add_service_description(client_id, &request).await {
        Ok(created) => {
            run.record(entity, step, Status::Created, created.id);
            Flow::Continue
        }
        Err(error) if error.is_conflict() => {
            run.record(entity, step, Status::AlreadySatisfied, error.to_string());
            Flow::Continue
        }
        Err(error) => {
            run.failed(entity, step, error);
            Flow::Abandon
        }
    }
}

/// Enable the service description if it's disabled.
pub(crate) async fn enable(
    run: &mut ServerRun<'_>,
    client_id: &str,
    entity: &str,
    description: &ServiceDescriptionConfig,
) -> Flow {
    let step = Step::ServiceDescriptionEnable;
    let Some(remote) = locate(run, client_id, entity, description, step).await else {
        return Flow::Abandon;
    };
    if !remote.disabled {
        run.record(entity, step, Status::AlreadySatisfied, remote.id);
        return Flow::Continue;
    }

    match run.api.enable_service_description(&remote.id).await {
        Ok(()) => {
            run.record(entity, step, Status::Enabled, remote.id);
            Flow::Continue
        }
        Err(error) if error.is_conflict() => {
            run.record(entity, step, Status::AlreadySatisfied, error.to_string());
            Flow::Continue
        }
        Err(error) => {
            run.failed(entity, step, error);
            Flow::Abandon
        }
    }
}

/// The identifier of a subsystem of the client's member, as used for service clients.
fn subsystem_id(client: &Client, subsystem_code: &str) -> String {
    let instance = client
        .instance_id
        .clone()
        .or_else(|| {
            client
                .id
                .as_deref()
                .and_then(|id| id.split(':').next())
                .map(str::to_string)
        })
        .unwrap_or_default();
    format!(
        "{instance}:{}:{}:{subsystem_code}",
        client.member_class, client.member_code
    )
}

/// Grant the configured subsystems access to each service of the description.
pub(crate) async fn access(
    run: &mut ServerRun<'_>,
    client: &Client,
    client_id: &str,
    entity: &str,
    description: &ServiceDescriptionConfig,
) -> Flow {
    let step = Step::ServiceAccess;
    let Some(remote) = locate(run, client_id, entity, description, step).await else {
        return Flow::Abandon;
    };

    for service in &remote.services {
        let desired = description.access_for(&service.service_code);
        if desired.is_empty() {
            continue;
        }
        let service_entity = format!("{entity} {}", service.service_code);
        let present = match run.api.service_clients(&service.id).await {
            Ok(present) => present,
            Err(error) => {
                run.failed(service_entity, step, error);
                if run.is_unreachable() {
                    return Flow::Abandon;
                }
                continue;
            }
        };

        let missing: Vec<ServiceClient> = desired
            .iter()
            .map(|subsystem_code| subsystem_id(client, subsystem_code))
            .filter(|id| !probe::has_service_client(&present, id))
            .map(|id| ServiceClient {
                id,
                name: client.member_name.clone(),
                service_client_type: ServiceClientType::Subsystem,
            })
            .collect();
        if missing.is_empty() {
            run.record(
                service_entity,
                step,
                Status::AlreadySatisfied,
                desired.join(", "),
            );
            continue;
        }

        let granted = missing
            .iter()
            .map(|service_client| service_client.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match run.api.add_service_clients(&service.id, missing).await {
            Ok(_) => run.record(service_entity, step, Status::Created, granted),
            Err(error) if error.is_conflict() => run.record(
                service_entity,
                step,
                Status::AlreadySatisfied,
                error.to_string(),
            ),
            Err(error) => {
                run.failed(service_entity, step, error);
                if run.is_unreachable() {
                    return Flow::Abandon;
                }
            }
        }
    }
    Flow::Continue
}

fn differs<T: PartialEq>(desired: Option<T>, current: Option<T>) -> bool {
    desired.is_some() && desired != current
}

/// Compute the update needed to bring a service's parameters to the desired values, if any.
fn parameter_update(service: &Service, desired: &ServiceParameters) -> Option<ServiceUpdate> {
    let changed = differs(desired.url.as_deref(), service.url.as_deref())
        || differs(desired.timeout, service.timeout)
        || differs(desired.ssl_auth, service.ssl_auth);
    changed.then(|| ServiceUpdate {
        url: desired.url.clone().or_else(|| service.url.clone()),
        timeout: desired.timeout.or(service.timeout),
        ssl_auth: desired.ssl_auth.or(service.ssl_auth),
        url_all: false,
        timeout_all: false,
        ssl_auth_all: false,
    })
}

/// Update the url, timeout, and TLS authentication settings of each service of the description.
pub(crate) async fn parameters(
    run: &mut ServerRun<'_>,
    client_id: &str,
    entity: &str,
    description: &ServiceDescriptionConfig,
) -> Flow {
    let step = Step::ServiceParameters;
    let configured = description.url_all.is_some()
        || description.timeout.is_some()
        || description.ssl_auth.is_some()
        || !description.services.is_empty();
    if !configured {
        return Flow::Continue;
    }
    let Some(remote) = locate(run, client_id, entity, description, step).await else {
        return Flow::Abandon;
    };

    for service in &remote.services {
        let desired = description.parameters_for(&service.service_code);
        if desired.is_empty() {
            continue;
        }
        let service_entity = format!("{entity} {}", service.service_code);
        let Some(update) = parameter_update(service, &desired) else {
            run.record(service_entity, step, Status::AlreadySatisfied, "");
            continue;
        };

        match run.api.update_service(&service.id, &update).await {
            Ok(updated) => run.record(service_entity, step, Status::Updated, updated.id),
            Err(error) if error.is_conflict() => run.record(
                service_entity,
                step,
                Status::AlreadySatisfied,
                error.to_string(),
            ),
            Err(error) => {
                run.failed(service_entity, step, error);
                if run.is_unreachable() {
                    return Flow::Abandon;
                }
            }
        }
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(url: Option<&str>, timeout: Option<u32>, ssl_auth: Option<bool>) -> Service {
        Service {
            id: "DEV:GOV:1234:SUB1:pets".to_string(),
            service_code: "pets".to_string(),
            full_service_code: None,
            timeout,
            ssl_auth,
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn matching_parameters_need_no_update() {
        let remote = service(Some("http://pets"), Some(60), Some(false));
        let desired = ServiceParameters {
            url: None,
            timeout: Some(60),
            ssl_auth: Some(false),
        };

        assert_eq!(None, parameter_update(&remote, &desired));
    }

    #[test]
    fn changed_timeout_keeps_other_values() {
        let remote = service(Some("http://pets"), Some(60), Some(false));
        let desired = ServiceParameters {
            url: None,
            timeout: Some(120),
            ssl_auth: None,
        };

        let update = parameter_update(&remote, &desired).expect("timeout differs");

        assert_eq!(Some("http://pets".to_string()), update.url);
        assert_eq!(Some(120), update.timeout);
        assert_eq!(Some(false), update.ssl_auth);
        assert!(!update.url_all && !update.timeout_all && !update.ssl_auth_all);
    }

    #[test]
    fn subsystem_id_prefers_instance_id() {
        let client = Client {
            id: Some("DEV:GOV:1234:SUB1".to_string()),
            instance_id: None,
            member_class: "GOV".to_string(),
            member_code: "1234".to_string(),
            member_name: None,
            subsystem_code: Some("SUB1".to_string()),
            owner: false,
            has_valid_local_sign_cert: false,
            connection_type: None,
            status: None,
        };

        assert_eq!("DEV:GOV:1234:SUB2", subsystem_id(&client, "SUB2"));

        let client = Client {
            instance_id: Some("PROD".to_string()),
            ..client
        };
        assert_eq!("PROD:GOV:1234:SUB2", subsystem_id(&client, "SUB2"));
    }
}
