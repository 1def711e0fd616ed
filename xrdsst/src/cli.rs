// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Define the command-line interface.
//!
//! This is where subcommands, the arguments, and their types are defined.

use std::path::PathBuf;

use clap::Parser;

use crate::{converge::Step, report::OutputFormat};

/// The default location of the configuration document, relative to `$XDG_CONFIG_HOME`.
pub const DEFAULT_CONFIG: &str = "xrdsst/config.yaml";

/// Configure X-Road security servers from a declarative document.
///
/// Every command reads the desired state of one or more security servers from the
/// configuration document, compares it with what each server's admin API reports, and makes
/// only the calls needed to close the gap. Running a command twice is harmless: entities
/// already in the desired state are reported as ALREADY_SATISFIED and left alone.
///
/// To view the format of the configuration document, consult the `config` subcommand.
///
/// The exit status is non-zero if any step failed, matched more than one remote entity, or
/// lacked required configuration.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// The path to the configuration document.
    ///
    /// If no path is provided, `$XDG_CONFIG_HOME/xrdsst/config.yaml` is used.
    #[arg(long, short, env = "XRDSST_CONFIG")]
    pub config: Option<PathBuf>,

    /// How to render the results.
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// A set of one or more comma-separated directives to filter logs.
    ///
    /// The general format is "target_name[span_name{field=value}]=level" where level is
    /// one of TRACE, DEBUG, INFO, WARN, ERROR.
    ///
    /// Details: https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[arg(long, env = "XRDSST_LOG", default_value = "WARN,xrdsst=INFO")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Run every configuration step, in dependency order.
    ///
    /// Servers are initialized, given a timestamping service, and have their certificates
    /// imported, registered, and activated. Then each client is added, registered, updated, and
    /// given its TLS certificates, and finally each client's service descriptions are added,
    /// enabled, and given their access rights and service parameters.
    Apply,
    /// Upload the configuration anchor and initialize each server.
    Init,
    /// Manage timestamping services.
    #[command(subcommand)]
    Timestamp(TimestampCommand),
    /// Manage the certificates on each server's software token.
    #[command(subcommand)]
    Cert(CertCommand),
    /// Manage client subsystems.
    #[command(subcommand)]
    Client(ClientCommand),
    /// Manage the service descriptions of clients.
    #[command(subcommand)]
    Service(ServiceCommand),
    /// Print the configuration that would be used and exit.
    ///
    /// If no configuration document is found, an example document is printed.
    Config,
}

#[derive(clap::Subcommand, Debug)]
pub enum TimestampCommand {
    /// Configure the first approved timestamping service on servers that have none.
    Init,
    /// List the timestamping services approved by the central server.
    ListApproved,
    /// List the timestamping services each server is configured to use.
    ListConfigured,
}

#[derive(clap::Subcommand, Debug)]
pub enum CertCommand {
    /// Import the configured certificates into the software token.
    Import,
    /// Register the auth certificate with the central server.
    Register,
    /// Activate the registered auth certificate.
    Activate,
    /// Download the certificate signing requests of the sign and auth keys.
    DownloadCsrs {
        /// The directory to write the DER encoded requests to.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ClientCommand {
    /// Add the configured clients that don't exist yet.
    Add,
    /// Submit registration requests for clients in the SAVED state.
    Register,
    /// Set the connection type of existing clients.
    Update,
    /// Trust the configured TLS certificates of information systems.
    ImportTls,
    /// Unregister clients by their server-assigned identifiers.
    Unregister {
        /// The name of the security server the clients are on.
        #[arg(long = "ss")]
        server: String,
        /// Client identifiers, for example "DEV:GOV:1234:SUB1".
        #[arg(long = "client", required = true, num_args = 1..)]
        clients: Vec<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ServiceCommand {
    /// Add the configured service descriptions that don't exist yet.
    AddDescription,
    /// Enable disabled service descriptions.
    EnableDescription,
    /// Grant the configured subsystems access to services.
    AddAccess,
    /// Update the url, timeout, and TLS authentication settings of services.
    UpdateParameters,
}

impl Command {
    /// The convergence steps this command runs against every server, if it's a convergence
    /// command.
    pub fn steps(&self) -> Option<&'static [Step]> {
        let steps: &'static [Step] = match self {
            Command::Apply => &Step::APPLY,
            Command::Init => &[Step::Init],
            Command::Timestamp(TimestampCommand::Init) => &[Step::Timestamp],
            Command::Cert(CertCommand::Import) => &[Step::CertImport],
            Command::Cert(CertCommand::Register) => &[Step::CertRegister],
            Command::Cert(CertCommand::Activate) => &[Step::CertActivate],
            Command::Client(ClientCommand::Add) => &[Step::ClientAdd],
            Command::Client(ClientCommand::Register) => &[Step::ClientRegister],
            Command::Client(ClientCommand::Update) => &[Step::ClientUpdate],
            Command::Client(ClientCommand::ImportTls) => &[Step::ClientImportTls],
            Command::Service(ServiceCommand::AddDescription) => &[Step::ServiceDescriptionAdd],
            Command::Service(ServiceCommand::EnableDescription) => {
                &[Step::ServiceDescriptionEnable]
            }
            Command::Service(ServiceCommand::AddAccess) => &[Step::ServiceAccess],
            Command::Service(ServiceCommand::UpdateParameters) => &[Step::ServiceParameters],
            Command::Timestamp(TimestampCommand::ListApproved | TimestampCommand::ListConfigured)
            | Command::Cert(CertCommand::DownloadCsrs { .. })
            | Command::Client(ClientCommand::Unregister { .. })
            | Command::Config => return None,
        };
        Some(steps)
    }
}
