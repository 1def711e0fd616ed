// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Convergence policies and the batch orchestrator.
//!
//! Every step follows the same pattern: probe the remote state of an entity, then issue at most
//! one mutating call to move it to the configured state. A conflict response to a mutating call
//! means the state is already in place. Any other failure is recorded and abandons the entity's
//! remaining steps; its siblings are processed as usual.
//!
//! Servers are processed one after another, and the steps for a server always run in the same
//! order so that an entity is never touched before the entity it depends on:
//!
//! 1. server initialization, timestamping, token certificate import, registration and
//!    activation;
//! 2. for each client: add, register, update, TLS certificates;
//! 3. for each of the client's service descriptions: add, enable, access rights, service
//!    parameters.

use std::fmt;

use serde::Serialize;
use tracing::Instrument;

use crate::{
    api::AdminClient,
    config::SecurityServer,
    context::{RunContext, Target},
    error::{ApiError, ConfigError, CredentialsError},
    report::{Outcome, Report, Status},
};

pub mod cert;
pub mod client;
pub mod init;
pub mod service;
pub mod timestamp;

/// A single convergence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Resolving the API key for the server.
    ApiKey,
    /// Configuration anchor upload and server initialization.
    Init,
    Timestamp,
    CertImport,
    CertRegister,
    CertActivate,
    DownloadCsrs,
    ClientAdd,
    ClientRegister,
    ClientUpdate,
    ClientImportTls,
    ClientUnregister,
    ServiceDescriptionAdd,
    ServiceDescriptionEnable,
    ServiceAccess,
    ServiceParameters,
}

impl Step {
    /// Every step `apply` performs, in order.
    pub const APPLY: [Step; 13] = [
        Step::Init,
        Step::Timestamp,
        Step::CertImport,
        Step::CertRegister,
        Step::CertActivate,
        Step::ClientAdd,
        Step::ClientRegister,
        Step::ClientUpdate,
        Step::ClientImportTls,
        Step::ServiceDescriptionAdd,
        Step::ServiceDescriptionEnable,
        Step::ServiceAccess,
        Step::ServiceParameters,
    ];

    fn is_server_level(&self) -> bool {
        matches!(
            self,
            Step::Init | Step::Timestamp | Step::CertImport | Step::CertRegister | Step::CertActivate
        )
    }

    fn is_description_level(&self) -> bool {
        matches!(
            self,
            Step::ServiceDescriptionAdd
                | Step::ServiceDescriptionEnable
                | Step::ServiceAccess
                | Step::ServiceParameters
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ApiKey => "api-key",
            Step::Init => "init",
            Step::Timestamp => "timestamp",
            Step::CertImport => "cert-import",
            Step::CertRegister => "cert-register",
            Step::CertActivate => "cert-activate",
            Step::DownloadCsrs => "download-csrs",
            Step::ClientAdd => "client-add",
            Step::ClientRegister => "client-register",
            Step::ClientUpdate => "client-update",
            Step::ClientImportTls => "client-import-tls",
            Step::ClientUnregister => "client-unregister",
            Step::ServiceDescriptionAdd => "service-description-add",
            Step::ServiceDescriptionEnable => "service-description-enable",
            Step::ServiceAccess => "service-access",
            Step::ServiceParameters => "service-parameters",
        };
        f.write_str(name)
    }
}

/// Whether an entity's remaining steps should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Abandon,
}

/// The state of one server's sub-run.
pub(crate) struct ServerRun<'a> {
    pub(crate) server: &'a SecurityServer,
    pub(crate) api: AdminClient,
    report: Report,
    unreachable: bool,
}

impl<'a> ServerRun<'a> {
    pub(crate) fn new(server: &'a SecurityServer, api: AdminClient) -> Self {
        Self {
            server,
            api,
            report: Report::new(),
            unreachable: false,
        }
    }

    /// Record the outcome of a step and log it.
    pub(crate) fn record(
        &mut self,
        entity: impl Into<String>,
        action: Step,
        status: Status,
        detail: impl Into<String>,
    ) {
        let outcome = Outcome {
            server: self.server.name.clone(),
            entity: entity.into(),
            action,
            status,
            detail: detail.into(),
        };
        log_outcome(&outcome);
        self.report.push(outcome);
    }

    /// Record a failed remote call. A transport failure marks the server unreachable.
    pub(crate) fn failed(&mut self, entity: impl Into<String>, action: Step, error: ApiError) {
        if error.is_transport() {
            self.unreachable = true;
        }
        self.record(entity, action, Status::Failed, error.to_string());
    }

    pub(crate) fn ambiguous(&mut self, entity: impl Into<String>, action: Step, count: usize) {
        self.record(
            entity,
            action,
            Status::Ambiguous,
            format!("{count} remote entities match; refusing to guess"),
        );
    }

    pub(crate) fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    pub(crate) fn finish(self) -> Report {
        self.report
    }
}

fn log_outcome(outcome: &Outcome) {
    let Outcome {
        server,
        entity,
        action,
        status,
        detail,
    } = outcome;
    if status.is_failure() {
        tracing::error!(server, entity, %action, %status, detail, "Convergence step failed");
    } else if matches!(status, Status::NotFound | Status::Skipped) {
        tracing::warn!(server, entity, %action, %status, detail, "Convergence step skipped");
    } else {
        tracing::info!(server, entity, %action, %status, detail, "Convergence step finished");
    }
}

fn single(server: &SecurityServer, action: Step, status: Status, detail: String) -> Report {
    let outcome = Outcome {
        server: server.name.clone(),
        entity: server.name.clone(),
        action,
        status,
        detail,
    };
    log_outcome(&outcome);
    let mut report = Report::new();
    report.push(outcome);
    report
}

/// Resolve the admin API client for a target, or the report explaining why there is none.
pub(crate) fn connect(server: &SecurityServer, target: &Target) -> Result<AdminClient, Report> {
    if let Err(error) = target.credentials() {
        let status = match error {
            CredentialsError::Creation(_) => Status::Failed,
            _ => Status::ConfigInvalid,
        };
        return Err(single(server, Step::ApiKey, status, error.to_string()));
    }
    target
        .admin_client()
        .map_err(|error| single(server, Step::ApiKey, Status::Failed, error.to_string()))
}

/// Run the given steps against every configured server, in document order.
pub async fn run(context: &RunContext, steps: &[Step]) -> Report {
    let mut report = Report::new();
    for (server, target) in context.servers() {
        let span = tracing::info_span!("server", name = server.name);
        let server_report = run_server(server, target, steps).instrument(span).await;
        report.extend(server_report);
    }
    report
}

/// Run the given steps against one server.
///
/// Steps whose required configuration keys are missing are reported as
/// [`Status::ConfigInvalid`] before any remote call is made, and are not run.
pub async fn run_server(server: &SecurityServer, target: &Target, steps: &[Step]) -> Report {
    let api = match connect(server, target) {
        Ok(api) => api,
        Err(report) => return report,
    };
    let mut run = ServerRun::new(server, api);

    let mut runnable = Vec::with_capacity(steps.len());
    for &step in steps {
        let missing = server.missing_keys(step);
        if missing.is_empty() {
            runnable.push(step);
        } else {
            let error = ConfigError::MissingKeys {
                server: server.name.clone(),
                keys: missing.into_iter().map(str::to_string).collect(),
            };
            run.record(server.name.clone(), step, Status::ConfigInvalid, error.to_string());
        }
    }

    for step in Step::APPLY
        .iter()
        .filter(|step| step.is_server_level() && runnable.contains(step))
    {
        match step {
            Step::Init => init::converge(&mut run).await,
            Step::Timestamp => timestamp::converge(&mut run).await,
            Step::CertImport => cert::import(&mut run).await,
            Step::CertRegister => cert::register(&mut run).await,
            Step::CertActivate => cert::activate(&mut run).await,
            _ => {}
        }
        if run.is_unreachable() {
            tracing::error!(
                server = server.name,
                "Server is unreachable; abandoning its remaining steps"
            );
            return run.finish();
        }
    }

    let client_steps: Vec<Step> = Step::APPLY
        .iter()
        .copied()
        .filter(|step| !step.is_server_level() && runnable.contains(step))
        .collect();
    if client_steps.is_empty() {
        return run.finish();
    }

    if client_steps.contains(&Step::ClientImportTls) {
        client::import_owner_tls(&mut run).await;
    }
    for client in &server.clients {
        if run.is_unreachable() {
            tracing::error!(
                server = server.name,
                "Server is unreachable; abandoning its remaining steps"
            );
            break;
        }
        client::converge(&mut run, client, &client_steps).await;
    }
    run.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_order_respects_dependencies() {
        let position = |step: Step| Step::APPLY.iter().position(|s| *s == step);

        assert!(position(Step::Init) < position(Step::CertImport));
        assert!(position(Step::CertImport) < position(Step::CertRegister));
        assert!(position(Step::CertRegister) < position(Step::CertActivate));
        assert!(position(Step::ClientAdd) < position(Step::ClientRegister));
        assert!(position(Step::ClientAdd) < position(Step::ServiceDescriptionAdd));
        assert!(position(Step::ServiceDescriptionAdd) < position(Step::ServiceDescriptionEnable));
        assert!(position(Step::ServiceDescriptionAdd) < position(Step::ServiceAccess));
        assert!(position(Step::ServiceAccess) < position(Step::ServiceParameters));
    }

    #[test]
    fn step_names_match_serialized_form() -> anyhow::Result<()> {
        for step in Step::APPLY {
            let serialized = serde_json::to_value(step)?;
            assert_eq!(serde_json::Value::String(step.to_string()), serialized);
        }
        Ok(())
    }

    #[test]
    fn description_steps_are_client_steps() {
        for step in Step::APPLY {
            if step.is_description_level() {
                assert!(!step.is_server_level());
            }
        }
    }
}
