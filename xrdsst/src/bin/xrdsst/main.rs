// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};
use xrdsst::{
    cli::{CertCommand, Cli, ClientCommand, Command, TimestampCommand, DEFAULT_CONFIG},
    config::{load_config, Config, Logging},
    context::RunContext,
    converge::{self, cert, client, timestamp},
    error::ConfigError,
    report::{self, Report},
};

// The exit status used when the run is interrupted, as a shell would report SIGINT.
const INTERRUPTED: u8 = 130;

fn init_logging(log_filter: &str, logging: Option<&Logging>) -> anyhow::Result<()> {
    let log_filter = EnvFilter::builder()
        .parse(log_filter)
        .context("XRDSST_LOG contains an invalid log directive; refer to https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives for format details.")?;
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(log_filter);

    let file_layer = match logging {
        Some(logging) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&logging.file)
                .with_context(|| format!("failed to open log file {}", logging.file.display()))?;
            let level = tracing::Level::from(logging.level);
            let file_filter = EnvFilter::builder()
                .parse(format!("WARN,xrdsst={level}"))
                .context("log level produced an invalid directive")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let opts = Cli::parse();

    if let Command::Config = opts.command {
        return Ok(print_config(opts.config));
    }

    let mut config = load_config(opts.config.clone(), Path::new(DEFAULT_CONFIG))?;
    init_logging(&opts.log_filter, config.logging.as_ref())?;
    if let Command::Client(ClientCommand::Unregister { server, .. }) = &opts.command {
        config.security_server.retain(|candidate| candidate.name == *server);
    }

    // Keys created before an interrupt are still revoked by close().
    let mut context = RunContext::unresolved(config);
    let result = tokio::select! {
        result = async {
            context.resolve().await;
            execute(&context, &opts).await
        } => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; no further calls will be made");
            None
        }
    };
    context.close().await;

    match result {
        Some(result) => {
            let (rendered, report) = result?;
            println!("{rendered}");
            if report.has_failures() {
                tracing::error!(failures = report.failures(), "Some steps did not succeed");
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        None => Ok(ExitCode::from(INTERRUPTED)),
    }
}

/// Print the configuration in use, or the example configuration if there is none.
///
/// A document that exists but fails to parse is an error, even though the example is printed.
fn print_config(path: Option<PathBuf>) -> ExitCode {
    match load_config(path, Path::new(DEFAULT_CONFIG)) {
        Ok(config) => {
            println!("# This is the current configuration\n\n{config}\n# This concludes the configuration.\n");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let invalid = matches!(
                error.downcast_ref::<ConfigError>(),
                Some(ConfigError::Parse(_) | ConfigError::DuplicateServer(_))
            );
            eprintln!("{error:?}");
            let example = Config::default();
            if invalid {
                println!("# The configuration file is invalid; this is an example configuration\n\n{example}");
                ExitCode::FAILURE
            } else {
                println!("# No configuration file was found; this is an example configuration\n\n{example}");
                ExitCode::SUCCESS
            }
        }
    }
}

/// Run the requested command, returning what to print and the report to derive the exit
/// status from.
async fn execute(context: &RunContext, opts: &Cli) -> anyhow::Result<(String, Report)> {
    if let Some(steps) = opts.command.steps() {
        let report = converge::run(context, steps).await;
        let rendered = report::render(report.outcomes(), opts.output)?;
        return Ok((rendered, report));
    }

    match &opts.command {
        Command::Timestamp(TimestampCommand::ListApproved) => {
            let (rows, report) = timestamp::list(context, timestamp::Listing::Approved).await;
            Ok((report::render(&rows, opts.output)?, report))
        }
        Command::Timestamp(TimestampCommand::ListConfigured) => {
            let (rows, report) = timestamp::list(context, timestamp::Listing::Configured).await;
            Ok((report::render(&rows, opts.output)?, report))
        }
        Command::Cert(CertCommand::DownloadCsrs { output_dir }) => {
            tokio::fs::create_dir_all(output_dir)
                .await
                .with_context(|| format!("failed to create {}", output_dir.display()))?;
            let (files, report) = cert::download_csrs(context, output_dir).await;
            Ok((report::render(&files, opts.output)?, report))
        }
        Command::Client(ClientCommand::Unregister { server, clients }) => {
            let report = client::unregister(context, server, clients).await;
            Ok((report::render(report.outcomes(), opts.output)?, report))
        }
        other => anyhow::bail!("{other:?} is not a command that runs against servers"),
    }
}
