// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Configuration anchor upload and server initialization.

use super::{ServerRun, Step};
use crate::{
    api::{local_file_error, InitialServerConf},
    report::Status,
};

/// Upload the configuration anchor and initialize the server, skipping whatever is already done.
pub(crate) async fn converge(run: &mut ServerRun<'_>) {
    let server = run.server;
    let (
        Some(anchor),
        Some(owner_member_class),
        Some(owner_member_code),
        Some(security_server_code),
        Some(software_token_pin),
    ) = (
        server.configuration_anchor.as_ref(),
        server.owner_member_class.as_ref(),
        server.owner_member_code.as_ref(),
        server.security_server_code.as_ref(),
        server.software_token_pin.as_ref(),
    )
    else {
        let missing = server.missing_keys(Step::Init).join(", ");
        run.record(
            server.name.clone(),
            Step::Init,
            Status::ConfigInvalid,
            format!("missing keys: {missing}"),
        );
        return;
    };

    let status = match run.api.initialization_status().await {
        Ok(status) => status,
        Err(error) => {
            run.failed(server.name.clone(), Step::Init, error);
            return;
        }
    };
    tracing::debug!(server = server.name, ?status, "Read initialization status");

    let anchor_entity = anchor.display().to_string();
    if status.is_anchor_imported {
        run.record(
            anchor_entity,
            Step::Init,
            Status::AlreadySatisfied,
            "configuration anchor already imported",
        );
    } else {
        let contents = match tokio::fs::read(anchor).await {
            Ok(contents) => contents,
            Err(error) => {
                run.failed(anchor_entity, Step::Init, local_file_error(anchor, error));
                return;
            }
        };
        match run.api.upload_anchor(contents).await {
            Ok(()) => run.record(
                anchor_entity,
                Step::Init,
                Status::Imported,
                "configuration anchor",
            ),
            Err(error) if error.is_conflict() => run.record(
                anchor_entity,
                Step::Init,
                Status::AlreadySatisfied,
                error.to_string(),
            ),
            Err(error) => {
                run.failed(anchor_entity, Step::Init, error);
                return;
            }
        }
    }

    let entity = format!("{owner_member_class}:{owner_member_code}:{security_server_code}");
    if status.is_server_code_initialized {
        run.record(
            entity,
            Step::Init,
            Status::AlreadySatisfied,
            "server already initialized",
        );
        return;
    }

    let conf = InitialServerConf {
        owner_member_class: owner_member_class.clone(),
        owner_member_code: owner_member_code.clone(),
        security_server_code: security_server_code.clone(),
        software_token_pin: software_token_pin.clone(),
        ignore_warnings: true,
    };
    match run.api.initialize(&conf).await {
        Ok(()) => run.record(entity, Step::Init, Status::Initialized, ""),
        Err(error) if error.is_conflict() => run.record(
            entity,
            Step::Init,
            Status::AlreadySatisfied,
            error.to_string(),
        ),
        Err(error) => run.failed(entity, Step::Init, error),
    }
}
