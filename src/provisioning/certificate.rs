use log::{debug, info, warn};

use crate::cloud::{CertificateAuthority, ClientError};
use crate::core::config::ProvisionerConfig;
use crate::core::types::{CertificateRecord, CertificateStatus, DnsInstruction, DnsPurpose};
use crate::domain::relative_record_name;

use super::error::ProvisionError;
use super::poller::{ConvergencePoller, PollPolicy, PollResult};
use super::progress::{ProgressEvent, ProgressSink};
use super::settle;

/// Finds or requests the DNS-validated certificate for a domain and waits for issuance.
pub struct CertificateProvisioner<'a, A: CertificateAuthority + ?Sized> {
    authority: &'a A,
    poller: &'a ConvergencePoller,
    record_poll: PollPolicy,
    issuance_poll: PollPolicy,
    progress: &'a dyn ProgressSink,
}

impl<'a, A: CertificateAuthority + ?Sized> CertificateProvisioner<'a, A> {
    pub fn new(
        authority: &'a A,
        poller: &'a ConvergencePoller,
        config: &ProvisionerConfig,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            authority,
            poller,
            record_poll: config.record_poll,
            issuance_poll: config.issuance_poll,
            progress,
        }
    }

    /// Newest requested, pending or issued certificate covering `domain`.
    pub fn find_certificate(&self, domain: &str) -> Result<Option<CertificateRecord>, ProvisionError> {
        let certificates = self
            .authority
            .list_certificates(&CertificateStatus::REUSABLE)
            .map_err(|err| ProvisionError::remote("list_certificates", err))?;

        let found = certificates
            .into_iter()
            .filter(|certificate| {
                CertificateStatus::REUSABLE.contains(&certificate.status) && certificate.covers(domain)
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    /// Returns an issued certificate for `domain`, requesting one only when
    /// no reusable certificate exists.
    pub fn ensure_certificate(&self, domain: &str) -> Result<CertificateRecord, ProvisionError> {
        let certificate = match self.find_certificate(domain)? {
            Some(existing) => {
                info!(
                    "[certificate] reusing {} for {} ({})",
                    existing.id, domain, existing.status
                );
                self.progress.emit(&ProgressEvent::CertificateAdopted {
                    certificate_id: existing.id.clone(),
                    status: existing.status,
                });
                existing
            }
            None => {
                info!("[certificate] requesting certificate for {}", domain);
                let requested = self
                    .authority
                    .request_certificate(domain)
                    .map_err(|err| ProvisionError::remote("request_certificate", err))?;
                info!("[certificate] requested {}", requested.id);
                self.progress.emit(&ProgressEvent::CertificateRequested {
                    certificate_id: requested.id.clone(),
                });
                requested
            }
        };

        if certificate.status == CertificateStatus::Issued {
            return Ok(certificate);
        }

        let certificate = self.wait_for_validation_records(&certificate.id)?;
        if certificate.status == CertificateStatus::Issued {
            self.progress.emit(&ProgressEvent::CertificateIssued {
                certificate_id: certificate.id.clone(),
            });
            return Ok(certificate);
        }

        self.progress.emit(&ProgressEvent::ValidationRecordsRequired {
            certificate_id: certificate.id.clone(),
            records: validation_instructions(&certificate),
        });
        self.wait_for_issuance(&certificate)
    }

    /// Pending certificate for `domain` described with its validation records.
    pub fn pending_validations(&self, domain: &str) -> Result<Option<CertificateRecord>, ProvisionError> {
        let Some(found) = self.find_certificate(domain)? else {
            return Ok(None);
        };
        if found.status == CertificateStatus::Issued {
            return Ok(None);
        }
        let described = self
            .authority
            .describe_certificate(&found.id)
            .map_err(|err| ProvisionError::remote("describe_certificate", err))?;
        Ok(Some(described))
    }

    fn wait_for_validation_records(
        &self,
        certificate_id: &str,
    ) -> Result<CertificateRecord, ProvisionError> {
        self.progress.emit(&ProgressEvent::AwaitingValidationRecords {
            certificate_id: certificate_id.to_string(),
        });
        let mut last_observed = "no validation records".to_string();
        let outcome = self.poller.poll_until(
            "certificate validation records",
            &self.record_poll,
            || match self.authority.describe_certificate(certificate_id) {
                Ok(record) => {
                    last_observed = format!(
                        "{} with {} validation record(s)",
                        record.status,
                        record.validation_records.len()
                    );
                    match record.status {
                        CertificateStatus::Failed => PollResult::Failed(validation_failed(&record)),
                        CertificateStatus::Issued => PollResult::Ready(record),
                        _ if record.has_all_validation_records() => PollResult::Ready(record),
                        _ => PollResult::NotYet,
                    }
                }
                // A just-requested certificate may not be visible to describe yet.
                Err(err @ ClientError::NotFound { .. }) => {
                    debug!("[certificate] {} not visible yet", certificate_id);
                    last_observed = err.to_string();
                    PollResult::NotYet
                }
                Err(err) if err.is_transient() => {
                    warn!("[certificate] describe {} failed: {}", certificate_id, err);
                    last_observed = err.to_string();
                    PollResult::NotYet
                }
                Err(err) => PollResult::Failed(ProvisionError::remote("describe_certificate", err)),
            },
        );
        settle(
            outcome,
            format!("validation records of certificate {certificate_id}"),
            last_observed,
        )
    }

    fn wait_for_issuance(
        &self,
        certificate: &CertificateRecord,
    ) -> Result<CertificateRecord, ProvisionError> {
        info!(
            "[certificate] waiting for {} to be issued; add the validation records to DNS",
            certificate.id
        );
        self.progress.emit(&ProgressEvent::AwaitingIssuance {
            certificate_id: certificate.id.clone(),
            status: certificate.status,
        });
        let mut last_observed = certificate.status.to_string();
        let outcome = self.poller.poll_until("certificate issuance", &self.issuance_poll, || {
            match self.authority.describe_certificate(&certificate.id) {
                Ok(record) => {
                    info!("[certificate] {} status {}", record.id, record.status);
                    last_observed = record.status.to_string();
                    match record.status {
                        CertificateStatus::Issued => PollResult::Ready(record),
                        CertificateStatus::Failed => PollResult::Failed(validation_failed(&record)),
                        _ => PollResult::NotYet,
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!("[certificate] describe {} failed: {}", certificate.id, err);
                    PollResult::NotYet
                }
                Err(err) => PollResult::Failed(ProvisionError::remote("describe_certificate", err)),
            }
        });
        let issued = settle(
            outcome,
            format!("issuance of certificate {}", certificate.id),
            last_observed,
        )?;
        info!("[certificate] {} issued", issued.id);
        self.progress.emit(&ProgressEvent::CertificateIssued {
            certificate_id: issued.id.clone(),
        });
        Ok(issued)
    }
}

fn validation_failed(record: &CertificateRecord) -> ProvisionError {
    ProvisionError::ValidationFailed {
        certificate_id: record.id.clone(),
        reason: record
            .failure_reason
            .clone()
            .unwrap_or_else(|| "validation failed".to_string()),
    }
}

/// Validation records as registrar-ready DNS instructions.
pub fn validation_instructions(certificate: &CertificateRecord) -> Vec<DnsInstruction> {
    certificate
        .validation_records
        .iter()
        .map(|record| DnsInstruction {
            purpose: DnsPurpose::CertificateValidation,
            record_type: record.record_type.clone(),
            name: record.name.clone(),
            relative_name: relative_record_name(&record.name),
            value: record.value.clone(),
        })
        .collect()
}
