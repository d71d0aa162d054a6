//! Drives a site through origin, certificate and distribution convergence.
//!
//! Every run re-derives its position from the remote inventories, so a run
//! halted by a timeout or cancellation is resumed simply by running it again.

use std::collections::HashSet;
use std::fmt;
use std::thread;

use log::{error, info, warn};
use serde::Serialize;

use crate::cloud::ResourceClient;
use crate::core::config::ProvisionerConfig;
use crate::core::types::{
    CertificateRecord, DistributionRecord, DistributionStatus, DnsInstruction,
    InvalidationRequest, OriginRecord, ProvisioningSpec,
};

use super::cancel::CancellationToken;
use super::certificate::{CertificateProvisioner, validation_instructions};
use super::distribution::{DistributionProvisioner, alias_instruction, binding_conflicts};
use super::error::ProvisionError;
use super::origin::{OriginProvisioner, UploadSummary};
use super::poller::ConvergencePoller;
use super::progress::{ProgressEvent, ProgressSink, ProvisioningWarning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Start,
    OriginReady,
    CertificateReady,
    DistributionReady,
    Done,
    Failed,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisioningState::Start => "start",
            ProvisioningState::OriginReady => "origin-ready",
            ProvisioningState::CertificateReady => "certificate-ready",
            ProvisioningState::DistributionReady => "distribution-ready",
            ProvisioningState::Done => "done",
            ProvisioningState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one converge or refresh run.
#[derive(Debug)]
pub struct ProvisioningReport {
    pub domain: String,
    /// Last state reached; `Failed` only for errors a re-run cannot fix.
    pub state: ProvisioningState,
    pub origin: Option<OriginRecord>,
    pub upload: Option<UploadSummary>,
    pub certificate: Option<CertificateRecord>,
    pub distribution: Option<DistributionRecord>,
    pub invalidation: Option<InvalidationRequest>,
    /// Manual DNS changes, in the order they should be made.
    pub dns_instructions: Vec<DnsInstruction>,
    pub warnings: Vec<ProvisioningWarning>,
    pub error: Option<ProvisionError>,
}

impl ProvisioningReport {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: ProvisioningState::Start,
            origin: None,
            upload: None,
            certificate: None,
            distribution: None,
            invalidation: None,
            dns_instructions: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ProvisioningState::Done
    }

    /// Halted without a terminal error; running again continues from `state`.
    pub fn is_resumable(&self) -> bool {
        self.state != ProvisioningState::Failed && self.error.is_some()
    }

    /// Hostname the domain must be aliased to, once known.
    pub fn distribution_hostname(&self) -> Option<&str> {
        self.distribution
            .as_ref()
            .map(|distribution| distribution.domain_name.as_str())
    }
}

/// Read-only snapshot of what exists remotely for a domain.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub domain: String,
    pub origin_id: String,
    pub origin_exists: bool,
    pub website_endpoint: Option<String>,
    pub certificate: Option<CertificateRecord>,
    pub distribution: Option<DistributionRecord>,
    pub dns_instructions: Vec<DnsInstruction>,
}

pub struct ProvisioningOrchestrator<'a, C: ResourceClient + ?Sized> {
    client: &'a C,
    config: ProvisionerConfig,
    poller: ConvergencePoller,
    progress: &'a dyn ProgressSink,
}

impl<'a, C: ResourceClient + ?Sized> ProvisioningOrchestrator<'a, C> {
    pub fn new(client: &'a C, config: ProvisionerConfig, progress: &'a dyn ProgressSink) -> Self {
        Self {
            client,
            config,
            poller: ConvergencePoller::default(),
            progress,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.poller = ConvergencePoller::new(token);
        self
    }

    /// Converges the domain to a deployed distribution over an issued
    /// certificate and a public origin. Never panics on remote failure;
    /// the report carries the error.
    pub fn converge(&self, spec: &ProvisioningSpec) -> ProvisioningReport {
        info!("[orchestrator] converging {}", spec.domain);
        let mut report = ProvisioningReport::new(&spec.domain);
        if let Err(err) = self.drive_converge(spec, &mut report) {
            self.halt(&mut report, err);
        }
        report
    }

    /// Re-publishes content and invalidates the distribution cache without
    /// requesting certificates or creating distributions.
    pub fn refresh(&self, spec: &ProvisioningSpec, paths: &[String]) -> ProvisioningReport {
        info!("[orchestrator] refreshing {}", spec.domain);
        let mut report = ProvisioningReport::new(&spec.domain);
        if let Err(err) = self.drive_refresh(spec, paths, &mut report) {
            self.halt(&mut report, err);
        }
        report
    }

    /// Looks up every resource for the domain without changing anything.
    pub fn inspect(&self, spec: &ProvisioningSpec) -> Result<DeploymentStatus, ProvisionError> {
        let origin_exists = self
            .client
            .bucket_exists(&spec.origin_id)
            .map_err(|err| ProvisionError::remote("bucket_exists", err))?;
        let certificates = self.certificates();
        let certificate = match certificates.find_certificate(&spec.domain)? {
            Some(found) if !found.status.is_terminal() => certificates.pending_validations(&spec.domain)?,
            other => other,
        };
        let distribution = self.distributions().find_distribution(&spec.domain)?;

        let mut dns_instructions = certificate
            .as_ref()
            .filter(|c| !c.status.is_terminal())
            .map(validation_instructions)
            .unwrap_or_default();
        if let Some(distribution) = &distribution {
            dns_instructions.push(alias_instruction(&spec.domain, distribution));
        }

        Ok(DeploymentStatus {
            domain: spec.domain.clone(),
            origin_id: spec.origin_id.clone(),
            origin_exists,
            website_endpoint: origin_exists.then(|| self.client.website_endpoint(&spec.origin_id)),
            certificate,
            distribution,
            dns_instructions,
        })
    }

    fn certificates(&self) -> CertificateProvisioner<'_, C> {
        CertificateProvisioner::new(self.client, &self.poller, &self.config, self.progress)
    }

    fn distributions(&self) -> DistributionProvisioner<'_, C> {
        DistributionProvisioner::new(self.client, &self.poller, &self.config, self.progress)
    }

    fn drive_converge(
        &self,
        spec: &ProvisioningSpec,
        report: &mut ProvisioningReport,
    ) -> Result<(), ProvisionError> {
        spec.validate().map_err(ProvisionError::InvalidSpec)?;

        let origin = self.prepare_origin(spec, report)?;

        let certificate = self.certificates().ensure_certificate(&spec.domain)?;
        report.certificate = Some(certificate.clone());
        self.advance(report, ProvisioningState::CertificateReady);

        let distributions = self.distributions();
        let mut distribution = distributions.ensure_distribution(spec, &certificate, &origin)?;
        for warning in binding_conflicts(&distribution, &certificate, &origin) {
            self.progress.emit(&ProgressEvent::Warning(warning.clone()));
            report.warnings.push(warning);
        }
        report.distribution = Some(distribution.clone());
        if self.config.wait_for_deployment && distribution.status != DistributionStatus::Deployed {
            distribution = distributions.wait_until_deployed(&distribution.id)?;
            report.distribution = Some(distribution.clone());
        }
        self.advance(report, ProvisioningState::DistributionReady);

        let alias = alias_instruction(&spec.domain, &distribution);
        self.progress.emit(&ProgressEvent::AliasRequired(alias.clone()));
        report.dns_instructions.push(alias);
        self.advance(report, ProvisioningState::Done);
        Ok(())
    }

    fn drive_refresh(
        &self,
        spec: &ProvisioningSpec,
        paths: &[String],
        report: &mut ProvisioningReport,
    ) -> Result<(), ProvisionError> {
        spec.validate().map_err(ProvisionError::InvalidSpec)?;

        self.prepare_origin(spec, report)?;

        let distributions = self.distributions();
        let distribution = distributions
            .find_distribution(&spec.domain)?
            .ok_or_else(|| ProvisionError::NotProvisioned {
                domain: spec.domain.clone(),
            })?;
        report.distribution = Some(distribution.clone());
        self.advance(report, ProvisioningState::DistributionReady);

        let mut invalidation = distributions.invalidate(&distribution.id, paths)?;
        report.invalidation = Some(invalidation.clone());
        if self.config.wait_for_invalidation {
            invalidation = distributions.wait_for_invalidation(&distribution.id, &invalidation.id)?;
            report.invalidation = Some(invalidation);
        }
        self.advance(report, ProvisioningState::Done);
        Ok(())
    }

    fn prepare_origin(
        &self,
        spec: &ProvisioningSpec,
        report: &mut ProvisioningReport,
    ) -> Result<OriginRecord, ProvisionError> {
        let origins = OriginProvisioner::new(self.client, self.progress);
        let origin = origins.ensure_origin(&spec.origin_id, spec)?;
        report.origin = Some(origin.clone());
        if let Some(site_dir) = &spec.site_dir {
            report.upload = Some(origins.publish_site(&spec.origin_id, site_dir)?);
        }
        self.advance(report, ProvisioningState::OriginReady);
        Ok(origin)
    }

    fn advance(&self, report: &mut ProvisioningReport, state: ProvisioningState) {
        info!("[orchestrator] {} -> {}", report.domain, state);
        report.state = state;
        self.progress.emit(&ProgressEvent::StateChanged {
            domain: report.domain.clone(),
            state,
        });
    }

    fn halt(&self, report: &mut ProvisioningReport, err: ProvisionError) {
        if err.is_terminal() {
            error!("[orchestrator] {} failed: {}", report.domain, err);
            self.advance(report, ProvisioningState::Failed);
        } else {
            warn!(
                "[orchestrator] {} halted at {}: {}; run again to resume",
                report.domain, report.state, err
            );
        }
        report.error = Some(err);
    }
}

/// Converges several domains concurrently, one orchestrator per domain.
/// A domain listed more than once is converged once; reports follow the
/// first occurrence of each domain in `specs`.
pub fn converge_all<C: ResourceClient + ?Sized>(
    client: &C,
    config: &ProvisionerConfig,
    specs: &[ProvisioningSpec],
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Vec<ProvisioningReport> {
    let mut seen = HashSet::new();
    let distinct: Vec<&ProvisioningSpec> = specs
        .iter()
        .filter(|spec| {
            let first = seen.insert(spec.domain.as_str());
            if !first {
                warn!("[orchestrator] {} listed more than once; converging it once", spec.domain);
            }
            first
        })
        .collect();

    thread::scope(|scope| {
        let handles: Vec<_> = distinct
            .into_iter()
            .map(|spec| {
                scope.spawn(move || {
                    ProvisioningOrchestrator::new(client, config.clone(), progress)
                        .with_cancellation(cancel.clone())
                        .converge(spec)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CertificateAuthority, CertificateScript, InMemoryCloud, Operation};
    use crate::provisioning::progress::RecordingProgress;
    use std::time::Duration;

    fn fast() -> ProvisionerConfig {
        ProvisionerConfig::uniform(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn happy_path_reaches_done() {
        let cloud = InMemoryCloud::new();
        let progress = RecordingProgress::new();
        let orchestrator = ProvisioningOrchestrator::new(&cloud, fast(), &progress);

        let report = orchestrator.converge(&ProvisioningSpec::new("app.example.com").unwrap());
        assert!(report.is_done(), "{:?}", report.error);
        assert!(report.distribution_hostname().is_some());
        assert_eq!(report.dns_instructions.len(), 1);

        let states: Vec<ProvisioningState> = progress
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ProvisioningState::OriginReady,
                ProvisioningState::CertificateReady,
                ProvisioningState::DistributionReady,
                ProvisioningState::Done,
            ]
        );
    }

    #[test]
    fn invalid_spec_fails_before_any_call() {
        let cloud = InMemoryCloud::new();
        let progress = RecordingProgress::new();
        let orchestrator = ProvisioningOrchestrator::new(&cloud, fast(), &progress);
        let spec = ProvisioningSpec::new("app.example.com")
            .unwrap()
            .with_allowed_methods(Vec::new());

        let report = orchestrator.converge(&spec);
        assert_eq!(report.state, ProvisioningState::Failed);
        assert_eq!(cloud.calls(Operation::BucketExists), 0);
    }

    #[test]
    fn cancelled_run_is_resumable() {
        let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::pending_forever());
        let progress = RecordingProgress::new();
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator =
            ProvisioningOrchestrator::new(&cloud, fast(), &progress).with_cancellation(token);

        let report = orchestrator.converge(&ProvisioningSpec::new("app.example.com").unwrap());
        assert_eq!(report.state, ProvisioningState::OriginReady);
        assert!(report.is_resumable());
        assert!(matches!(report.error, Some(ProvisionError::Cancelled { .. })));
    }

    #[test]
    fn inspect_changes_nothing() {
        let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::pending_forever());
        cloud.request_certificate("app.example.com").unwrap();
        let progress = RecordingProgress::new();
        let orchestrator = ProvisioningOrchestrator::new(&cloud, fast(), &progress);

        let status = orchestrator
            .inspect(&ProvisioningSpec::new("app.example.com").unwrap())
            .unwrap();
        assert!(!status.origin_exists);
        assert!(status.website_endpoint.is_none());
        assert!(status.distribution.is_none());
        assert_eq!(status.dns_instructions.len(), 1);
        assert_eq!(cloud.calls(Operation::CreateBucket), 0);
        assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    }

    #[test]
    fn converge_all_keeps_order() {
        let cloud = InMemoryCloud::new();
        let progress = RecordingProgress::new();
        let specs = vec![
            ProvisioningSpec::new("a.example.com").unwrap(),
            ProvisioningSpec::new("b.example.com").unwrap(),
            ProvisioningSpec::new("c.example.com").unwrap(),
        ];

        let reports = converge_all(&cloud, &fast(), &specs, &progress, &CancellationToken::new());
        let domains: Vec<&str> = reports.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["a.example.com", "b.example.com", "c.example.com"]);
        assert!(reports.iter().all(ProvisioningReport::is_done));
        assert_eq!(cloud.calls(Operation::RequestCertificate), 3);
        assert_eq!(cloud.distributions().len(), 3);
    }
}
