use std::time::Duration;

use thiserror::Error;

use crate::cloud::ClientError;

/// Errors a provisioning step hands back to the orchestrator.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Network or availability failure; re-running the step is safe.
    #[error("{step}: remote temporarily unavailable: {source}")]
    TransientRemote {
        step: &'static str,
        #[source]
        source: ClientError,
    },
    /// The control plane refused the call (permissions, quotas, conflicts).
    #[error("{step}: remote rejected the request: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: ClientError,
    },
    /// The authority gave up on DNS validation; a human has to fix DNS.
    #[error("certificate {certificate_id} failed validation: {reason}")]
    ValidationFailed {
        certificate_id: String,
        reason: String,
    },
    #[error("distribution {distribution_id} is disabled")]
    DistributionDisabled { distribution_id: String },
    #[error(
        "timed out after {}s waiting for {waiting_for} (last observed: {last_observed})",
        .elapsed.as_secs()
    )]
    PollTimeout {
        waiting_for: String,
        elapsed: Duration,
        last_observed: String,
    },
    #[error("cancelled while waiting for {waiting_for} (last observed: {last_observed})")]
    Cancelled {
        waiting_for: String,
        last_observed: String,
    },
    /// Refresh was asked for a domain that has no distribution yet.
    #[error("no distribution serves {domain}; provision it first")]
    NotProvisioned { domain: String },
    #[error("invalid provisioning spec: {0}")]
    InvalidSpec(String),
    #[error("failed to read site content at {path}: {source}")]
    SiteContent {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Wraps a client failure, keeping transient ones retryable.
    pub fn remote(step: &'static str, source: ClientError) -> Self {
        if source.is_transient() {
            ProvisionError::TransientRemote { step, source }
        } else {
            ProvisionError::Remote { step, source }
        }
    }

    /// Re-invoking the run later can make progress without human action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::TransientRemote { .. }
                | ProvisionError::PollTimeout { .. }
                | ProvisionError::Cancelled { .. }
        )
    }

    /// Ends the run in the `Failed` state.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_client_errors_stay_retryable() {
        let err = ProvisionError::remote("ensure_origin", ClientError::unavailable("s3", "timeout"));
        assert!(matches!(err, ProvisionError::TransientRemote { .. }));
        assert!(err.is_retryable());

        let err = ProvisionError::remote("ensure_origin", ClientError::rejected("s3", "AccessDenied"));
        assert!(matches!(err, ProvisionError::Remote { .. }));
        assert!(err.is_terminal());
    }

    #[test]
    fn validation_failure_is_terminal() {
        let err = ProvisionError::ValidationFailed {
            certificate_id: "cert".into(),
            reason: "CAA_ERROR".into(),
        };
        assert!(err.is_terminal());
    }

    #[test]
    fn timeout_message_carries_last_status() {
        let err = ProvisionError::PollTimeout {
            waiting_for: "certificate issuance".into(),
            elapsed: Duration::from_secs(600),
            last_observed: "PENDING_VALIDATION".into(),
        };
        assert!(err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("600s"));
        assert!(message.contains("PENDING_VALIDATION"));
    }
}
