// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Outcome records and their renderings.

use std::fmt;

use serde::Serialize;
use tabled::Tabled;

use crate::converge::Step;

/// How an entity's convergence step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Created,
    Registered,
    Updated,
    Enabled,
    Imported,
    Activated,
    Configured,
    Initialized,
    Unregistered,
    /// The remote state already matched the configuration; no mutating call was made, or the
    /// server answered the mutating call with a conflict.
    AlreadySatisfied,
    /// The entity is in a state the step doesn't act on.
    Skipped,
    NotFound,
    /// More than one remote entity matched the natural key; no mutating call was made.
    Ambiguous,
    /// Keys required for the step are missing from the configuration.
    ConfigInvalid,
    Failed,
}

impl Status {
    /// Returns true if this status should cause a non-zero exit status.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::Failed | Status::Ambiguous | Status::ConfigInvalid
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Created => "CREATED",
            Status::Registered => "REGISTERED",
            Status::Updated => "UPDATED",
            Status::Enabled => "ENABLED",
            Status::Imported => "IMPORTED",
            Status::Activated => "ACTIVATED",
            Status::Configured => "CONFIGURED",
            Status::Initialized => "INITIALIZED",
            Status::Unregistered => "UNREGISTERED",
            Status::AlreadySatisfied => "ALREADY_SATISFIED",
            Status::Skipped => "SKIPPED",
            Status::NotFound => "NOT_FOUND",
            Status::Ambiguous => "AMBIGUOUS",
            Status::ConfigInvalid => "CONFIG_INVALID",
            Status::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// The result of one convergence step for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Outcome {
    /// The name of the security server.
    pub server: String,
    /// The entity's natural key (or file name, for certificates).
    pub entity: String,
    pub action: Step,
    pub status: Status,
    /// The server-assigned identifier, the remote error, or the reason for a skip.
    pub detail: String,
}

/// The ordered outcomes of a run.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct Report {
    outcomes: Vec<Outcome>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, other: Report) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// The outcomes for a given server, in order.
    pub fn for_server<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a Outcome> + 'a {
        self.outcomes
            .iter()
            .filter(move |outcome| outcome.server == server)
    }

    /// Returns true if any outcome is a failure.
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status.is_failure())
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_failure())
            .count()
    }
}

/// The rendering of reports and listings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    /// A plain table; the first line holds the column headers.
    #[default]
    Table,
    /// A JSON list of mappings.
    Json,
    /// A YAML list of mappings.
    Yaml,
}

/// Render a sequence of rows in the requested format.
pub fn render<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match format {
        OutputFormat::Table => tabled::Table::new(rows)
            .with(tabled::settings::Style::empty())
            .with(tabled::settings::Padding::new(0, 1, 0, 0))
            .to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(rows)?,
        OutputFormat::Yaml => serde_yaml::to_string(rows)?,
    };
    Ok(rendered)
}

/// A CSR written to disk by the CSR download listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CsrFile {
    #[tabled(rename = "CSR ID")]
    pub csr_id: String,
    #[tabled(rename = "KEY ID")]
    pub key_id: String,
    #[tabled(rename = "TYPE")]
    pub key_type: String,
    pub location: String,
}

/// A timestamping service, as listed for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TimestampingRow {
    pub server: String,
    pub name: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: Status) -> Outcome {
        Outcome {
            server: "ss1".to_string(),
            entity: "GOV:1234:SUB1".to_string(),
            action: Step::ClientAdd,
            status,
            detail: String::new(),
        }
    }

    #[test]
    fn failure_statuses() {
        let failures = [Status::Failed, Status::Ambiguous, Status::ConfigInvalid];
        for status in failures {
            assert!(status.is_failure(), "{status} should be a failure");
        }

        let fine = [
            Status::Created,
            Status::AlreadySatisfied,
            Status::NotFound,
            Status::Skipped,
        ];
        for status in fine {
            assert!(!status.is_failure(), "{status} should not be a failure");
        }
    }

    #[test]
    fn report_tracks_failures() {
        let mut report = Report::new();
        report.push(outcome(Status::Created));
        assert!(!report.has_failures());

        report.push(outcome(Status::Ambiguous));
        assert!(report.has_failures());
        assert_eq!(1, report.failures());
        assert_eq!(2, report.for_server("ss1").count());
        assert_eq!(0, report.for_server("ss2").count());
    }

    #[test]
    fn table_header_comes_first() -> anyhow::Result<()> {
        let rendered = render(&[outcome(Status::Created)], OutputFormat::Table)?;
        let mut lines = rendered.lines();

        let header = lines.next().unwrap_or_default();
        for column in ["SERVER", "ENTITY", "ACTION", "STATUS", "DETAIL"] {
            assert!(header.contains(column), "missing {column} in {header:?}");
        }
        let row = lines.next().unwrap_or_default();
        assert!(row.contains("client-add"));
        assert!(row.contains("CREATED"));
        Ok(())
    }

    #[test]
    fn json_is_a_list_of_mappings() -> anyhow::Result<()> {
        let rendered = render(&[outcome(Status::AlreadySatisfied)], OutputFormat::Json)?;
        let value: serde_json::Value = serde_json::from_str(&rendered)?;

        assert_eq!(
            serde_json::json!([{
                "server": "ss1",
                "entity": "GOV:1234:SUB1",
                "action": "client-add",
                "status": "ALREADY_SATISFIED",
                "detail": "",
            }]),
            value
        );
        Ok(())
    }

    #[test]
    fn csr_listing_headers() -> anyhow::Result<()> {
        let rows = [CsrFile {
            csr_id: "A1".to_string(),
            key_id: "K1".to_string(),
            key_type: "auth".to_string(),
            location: "/tmp/ss1-auth-CSR-A1-GOV-1234.der".to_string(),
        }];
        let rendered = render(&rows, OutputFormat::Table)?;
        let header = rendered.lines().next().unwrap_or_default();

        assert!(header.starts_with("CSR ID"));
        assert!(header.contains("KEY ID"));
        assert!(header.contains("LOCATION"));
        Ok(())
    }
}
