use std::fmt;
use std::sync::Mutex;

use log::{info, warn};
use serde::Serialize;

use crate::core::types::{CertificateStatus, DnsInstruction};

use super::orchestrator::ProvisioningState;

/// Something the operator should know about but that does not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProvisioningWarning {
    /// Remote state differs from what this run would have created; left untouched.
    ConflictingResourceState { resource: String, detail: String },
}

impl fmt::Display for ProvisioningWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningWarning::ConflictingResourceState { resource, detail } => {
                write!(f, "{resource}: {detail}")
            }
        }
    }
}

/// Structured progress of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProgressEvent {
    StateChanged {
        domain: String,
        state: ProvisioningState,
    },
    OriginReused {
        origin_id: String,
    },
    OriginCreated {
        origin_id: String,
    },
    HostingConfigured {
        origin_id: String,
        endpoint: String,
    },
    ContentPublished {
        origin_id: String,
        files: usize,
        bytes: u64,
    },
    CertificateAdopted {
        certificate_id: String,
        status: CertificateStatus,
    },
    CertificateRequested {
        certificate_id: String,
    },
    AwaitingValidationRecords {
        certificate_id: String,
    },
    /// DNS records the operator must publish before the certificate can issue.
    ValidationRecordsRequired {
        certificate_id: String,
        records: Vec<DnsInstruction>,
    },
    AwaitingIssuance {
        certificate_id: String,
        status: CertificateStatus,
    },
    CertificateIssued {
        certificate_id: String,
    },
    DistributionReused {
        distribution_id: String,
    },
    DistributionCreated {
        distribution_id: String,
        domain_name: String,
    },
    AwaitingDeployment {
        distribution_id: String,
    },
    InvalidationCreated {
        distribution_id: String,
        invalidation_id: String,
        paths: Vec<String>,
    },
    /// Final CNAME the operator must create at the registrar.
    AliasRequired(DnsInstruction),
    Warning(ProvisioningWarning),
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Forwards progress to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ValidationRecordsRequired {
                certificate_id,
                records,
            } => {
                info!("[progress] certificate {certificate_id} needs these DNS records:");
                for record in records {
                    info!(
                        "[progress]   {} {} -> {}",
                        record.record_type, record.name, record.value
                    );
                }
            }
            ProgressEvent::AliasRequired(record) => {
                info!(
                    "[progress] point {} {} at {}",
                    record.record_type, record.name, record.value
                );
            }
            ProgressEvent::Warning(warning) => warn!("[progress] {warning}"),
            other => info!("[progress] {other:?}"),
        }
    }
}

/// Keeps every event in memory; handy for tests and reports.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
