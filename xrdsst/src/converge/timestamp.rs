// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Timestamping services.

use super::{connect, ServerRun, Step};
use crate::{
    api::TimestampingService,
    context::RunContext,
    error::ApiError,
    report::{Report, Status, TimestampingRow},
};

/// Configure the first approved timestamping service unless the server already uses one.
pub(crate) async fn converge(run: &mut ServerRun<'_>) {
    let entity = run.server.name.clone();
    let configured = match run.api.configured_timestamping_services().await {
        Ok(configured) => configured,
        Err(error) => {
            run.failed(entity, Step::Timestamp, error);
            return;
        }
    };
    if !configured.is_empty() {
        let names = configured
            .iter()
            .map(|service| service.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        run.record(entity, Step::Timestamp, Status::AlreadySatisfied, names);
        return;
    }

    let approved = match run.api.approved_timestamping_services().await {
        Ok(approved) => approved,
        Err(error) => {
            run.failed(entity, Step::Timestamp, error);
            return;
        }
    };
    let Some(service) = approved.into_iter().next() else {
        run.record(
            entity,
            Step::Timestamp,
            Status::NotFound,
            "the central server has not approved any timestamping services",
        );
        return;
    };

    match run.api.add_timestamping_service(&service).await {
        Ok(added) => run.record(entity, Step::Timestamp, Status::Configured, added.name),
        Err(error) if error.is_conflict() => run.record(
            entity,
            Step::Timestamp,
            Status::AlreadySatisfied,
            error.to_string(),
        ),
        Err(error) => run.failed(entity, Step::Timestamp, error),
    }
}

/// Which timestamping services to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// Services approved by the central server.
    Approved,
    /// Services the security server is configured to use.
    Configured,
}

/// List timestamping services for every configured server.
///
/// Returns the rows and a report holding any failures.
pub async fn list(context: &RunContext, listing: Listing) -> (Vec<TimestampingRow>, Report) {
    let mut rows = Vec::new();
    let mut report = Report::new();

    for (server, target) in context.servers() {
        let api = match connect(server, target) {
            Ok(api) => api,
            Err(failure) => {
                report.extend(failure);
                continue;
            }
        };
        let services: Result<Vec<TimestampingService>, ApiError> = match listing {
            Listing::Approved => api.approved_timestamping_services().await,
            Listing::Configured => api.configured_timestamping_services().await,
        };
        match services {
            Ok(services) => rows.extend(services.into_iter().map(|service| TimestampingRow {
                server: server.name.clone(),
                name: service.name,
                url: service.url,
            })),
            Err(error) => {
                let mut run = ServerRun::new(server, api);
                run.failed(server.name.clone(), Step::Timestamp, error);
                report.extend(run.finish());
            }
        }
    }

    (rows, report)
}
