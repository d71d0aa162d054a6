pub mod cancel;
pub mod certificate;
pub mod distribution;
pub mod error;
pub mod orchestrator;
pub mod origin;
pub mod poller;
pub mod progress;

pub use cancel::CancellationToken;
pub use certificate::{CertificateProvisioner, validation_instructions};
pub use distribution::{DistributionProvisioner, alias_instruction, distribution_config};
pub use error::ProvisionError;
pub use orchestrator::{
    DeploymentStatus, ProvisioningOrchestrator, ProvisioningReport, ProvisioningState,
    converge_all,
};
pub use origin::{OriginProvisioner, UploadSummary};
pub use poller::{ConvergencePoller, Outcome, PollPolicy, PollResult};
pub use progress::{LogProgress, ProgressEvent, ProgressSink, ProvisioningWarning, RecordingProgress};

/// Turns a finished polling loop into the provisioning result.
pub(crate) fn settle<T>(
    outcome: Outcome<T, ProvisionError>,
    waiting_for: String,
    last_observed: String,
) -> Result<T, ProvisionError> {
    match outcome {
        Outcome::Ready(value) => Ok(value),
        Outcome::Failed(err) => Err(err),
        Outcome::TimedOut { elapsed, .. } => Err(ProvisionError::PollTimeout {
            waiting_for,
            elapsed,
            last_observed,
        }),
        Outcome::Cancelled => Err(ProvisionError::Cancelled {
            waiting_for,
            last_observed,
        }),
    }
}
