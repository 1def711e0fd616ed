// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Sign and auth certificates on the server's software token.

use std::path::{Path, PathBuf};

use openssl::{hash::MessageDigest, x509::X509};

use super::{connect, ServerRun, Step};
use crate::{
    api::{local_file_error, PossibleAction, Token},
    context::RunContext,
    error::ApiError,
    probe::{self, Probe},
    report::{CsrFile, Report, Status},
};

/// The error code the admin API uses when a certificate is already on the token.
const CERTIFICATE_ALREADY_EXISTS: &str = "certificate_already_exists";

/// A certificate read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCertificate {
    /// The DER encoding, which is what the admin API accepts.
    pub der: Vec<u8>,
    /// The upper-case hex SHA-1 fingerprint the admin API identifies certificates by.
    pub hash: String,
}

/// Load a PEM or DER encoded certificate.
pub async fn load_certificate(path: &Path) -> Result<LoadedCertificate, ApiError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|error| local_file_error(path, error))?;
    let certificate = X509::from_pem(&contents)
        .or_else(|_| X509::from_der(&contents))
        .map_err(|error| local_file_error(path, error))?;
    let der = certificate
        .to_der()
        .map_err(|error| local_file_error(path, error))?;
    let digest = certificate
        .digest(MessageDigest::sha1())
        .map_err(|error| local_file_error(path, error))?;
    let hash = digest.iter().map(|byte| format!("{byte:02X}")).collect();

    Ok(LoadedCertificate { der, hash })
}

async fn token(run: &mut ServerRun<'_>, step: Step) -> Option<Token> {
    let server = run.server;
    let token_id = server.software_token_id.as_deref()?;
    match run.api.token(token_id).await {
        Ok(token) => Some(token),
        Err(error) => {
            run.failed(format!("token {token_id}"), step, error);
            None
        }
    }
}

/// Import the configured certificates into the software token.
pub(crate) async fn import(run: &mut ServerRun<'_>) {
    let server = run.server;
    if server.certificates.is_empty() {
        return;
    }
    let Some(token) = token(run, Step::CertImport).await else {
        return;
    };

    for path in &server.certificates {
        let entity = path.display().to_string();
        let certificate = match load_certificate(path).await {
            Ok(certificate) => certificate,
            Err(error) => {
                run.failed(entity, Step::CertImport, error);
                continue;
            }
        };
        if probe::token_has_certificate(&token, &certificate.hash) {
            run.record(
                entity,
                Step::CertImport,
                Status::AlreadySatisfied,
                certificate.hash,
            );
            continue;
        }

        match run.api.import_token_certificate(certificate.der).await {
            Ok(imported) => run.record(
                entity,
                Step::CertImport,
                Status::Imported,
                imported.certificate_details.hash,
            ),
            Err(error) if error.code() == Some(CERTIFICATE_ALREADY_EXISTS) => run.record(
                entity,
                Step::CertImport,
                Status::AlreadySatisfied,
                certificate.hash,
            ),
            Err(error) => {
                run.failed(entity, Step::CertImport, error);
                if run.is_unreachable() {
                    return;
                }
            }
        }
    }
}

/// Find the auth certificate on which `action` is possible, recording why if there's none.
///
/// Returns the certificate hash.
async fn actionable_auth_certificate(
    run: &mut ServerRun<'_>,
    step: Step,
    action: PossibleAction,
) -> Option<String> {
    let label = run.server.auth_key_label();
    let token = token(run, step).await?;
    let key = match probe::find_key(&token, &label) {
        Probe::Found(key) => key,
        Probe::NotFound => {
            run.record(
                label,
                step,
                Status::NotFound,
                "no key with this label on the token",
            );
            return None;
        }
        Probe::Ambiguous(count) => {
            run.ambiguous(label, step, count);
            return None;
        }
    };

    match probe::find_actionable_certificate(key, action) {
        Probe::Found(certificate) => Some(certificate.certificate_details.hash.clone()),
        Probe::NotFound if key.certificates.is_empty() => {
            run.record(
                label,
                step,
                Status::NotFound,
                "the key has no certificates",
            );
            None
        }
        Probe::NotFound => {
            run.record(
                label,
                step,
                Status::AlreadySatisfied,
                format!("no certificate awaiting {action}"),
            );
            None
        }
        Probe::Ambiguous(count) => {
            run.ambiguous(label, step, count);
            None
        }
    }
}

/// Register the auth certificate with the central server.
pub(crate) async fn register(run: &mut ServerRun<'_>) {
    let Some(hash) =
        actionable_auth_certificate(run, Step::CertRegister, PossibleAction::Register).await
    else {
        return;
    };
    let Some(address) = run.server.address() else {
        run.record(
            hash,
            Step::CertRegister,
            Status::ConfigInvalid,
            "the server address can't be derived from its url",
        );
        return;
    };

    match run.api.register_token_certificate(&hash, &address).await {
        Ok(()) => run.record(hash, Step::CertRegister, Status::Registered, address),
        Err(error) if error.is_conflict() => run.record(
            hash,
            Step::CertRegister,
            Status::AlreadySatisfied,
            error.to_string(),
        ),
        Err(error) => run.failed(hash, Step::CertRegister, error),
    }
}

/// Activate the registered auth certificate.
pub(crate) async fn activate(run: &mut ServerRun<'_>) {
    let Some(hash) =
        actionable_auth_certificate(run, Step::CertActivate, PossibleAction::Activate).await
    else {
        return;
    };

    match run.api.activate_token_certificate(&hash).await {
        Ok(()) => {}
        Err(error) if error.is_conflict() => {
            run.record(
                hash,
                Step::CertActivate,
                Status::AlreadySatisfied,
                error.to_string(),
            );
            return;
        }
        Err(error) => {
            run.failed(hash, Step::CertActivate, error);
            return;
        }
    }

    match run.api.possible_actions(&hash).await {
        Ok(actions) if actions.contains(&PossibleAction::Activate) => run.record(
            hash,
            Step::CertActivate,
            Status::Failed,
            "the certificate can still be activated after activation",
        ),
        Ok(_) => run.record(hash, Step::CertActivate, Status::Activated, ""),
        Err(error) => run.failed(hash, Step::CertActivate, error),
    }
}

/// Download the certificate signing requests of each server's auth and sign keys into
/// `directory`.
///
/// Returns the files written and a report holding any failures.
pub async fn download_csrs(context: &RunContext, directory: &Path) -> (Vec<CsrFile>, Report) {
    let mut files = Vec::new();
    let mut report = Report::new();

    for (server, target) in context.servers() {
        let api = match connect(server, target) {
            Ok(api) => api,
            Err(failure) => {
                report.extend(failure);
                continue;
            }
        };
        let mut run = ServerRun::new(server, api);
        let missing = server.missing_keys(Step::DownloadCsrs);
        if !missing.is_empty() {
            run.record(
                server.name.clone(),
                Step::DownloadCsrs,
                Status::ConfigInvalid,
                format!("missing keys: {}", missing.join(", ")),
            );
            report.extend(run.finish());
            continue;
        }

        if let Some(token) = token(&mut run, Step::DownloadCsrs).await {
            let labels = [
                (server.sign_key_label(), "sign"),
                (server.auth_key_label(), "auth"),
            ];
            'keys: for (label, key_type) in labels {
                for key in token
                    .keys
                    .iter()
                    .filter(|key| key.label.as_deref() == Some(label.as_str()))
                {
                    for csr in &key.certificate_signing_requests {
                        let entity = format!("{} CSR {}", key.id, csr.id);
                        let csr_der = match run.api.download_csr(&key.id, &csr.id).await {
                            Ok(csr_der) => csr_der,
                            Err(error) => {
                                run.failed(entity, Step::DownloadCsrs, error);
                                if run.is_unreachable() {
                                    break 'keys;
                                }
                                continue;
                            }
                        };
                        let location =
                            csr_path(directory, &server.name, key_type, &csr.id, &key.id);
                        if let Err(error) = tokio::fs::write(&location, csr_der).await {
                            let error = local_file_error(&location, error);
                            run.failed(entity, Step::DownloadCsrs, error);
                            continue;
                        }
                        tracing::info!(
                            server = server.name,
                            key_id = key.id,
                            csr_id = csr.id,
                            location = %location.display(),
                            "Downloaded certificate signing request"
                        );
                        files.push(CsrFile {
                            csr_id: csr.id.clone(),
                            key_id: key.id.clone(),
                            key_type: key_type.to_uppercase(),
                            location: location.display().to_string(),
                        });
                    }
                }
            }
        }
        report.extend(run.finish());
    }

    (files, report)
}

fn csr_path(
    directory: &Path,
    server: &str,
    key_type: &str,
    csr_id: &str,
    key_id: &str,
) -> PathBuf {
    directory.join(format!("{server}-{key_type}-CSR-{csr_id}-{key_id}.der"))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[tokio::test]
    async fn pem_and_der_load_to_the_same_certificate() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let pem_path = directory.path().join("auth.pem");
        let der_path = directory.path().join("auth.der");
        let certificate = xrdsst_test::self_signed_certificate("ss1-auth")?;
        std::fs::write(&pem_path, certificate.to_pem()?)?;
        std::fs::write(&der_path, certificate.to_der()?)?;

        let from_pem = load_certificate(&pem_path).await?;
        let from_der = load_certificate(&der_path).await?;

        assert_eq!(from_pem, from_der);
        assert_eq!(40, from_pem.hash.len());
        assert!(from_pem
            .hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_is_a_local_file_error() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), b"not a certificate")?;

        let result = load_certificate(file.path()).await;

        assert!(matches!(result, Err(ApiError::LocalFile { .. })));
        Ok(())
    }

    #[test]
    fn csr_file_name() {
        let path = csr_path(Path::new("/tmp"), "ss1", "auth", "C1", "K1");

        assert_eq!(Path::new("/tmp/ss1-auth-CSR-C1-K1.der"), path);
    }
}
