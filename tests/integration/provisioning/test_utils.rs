use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use site_provisioner::core::types::{
    CertificateRecord, CertificateStatus, DistributionRecord, DistributionStatus,
    ProvisioningSpec,
};
use site_provisioner::provisioning::{ProvisioningReport, RecordingProgress};
use site_provisioner::{InMemoryCloud, ProvisionerConfig, ProvisioningOrchestrator};

pub const DOMAIN: &str = "app.example.com";

/// Millisecond polling so scripted lifecycles finish instantly.
pub fn fast_config() -> ProvisionerConfig {
    ProvisionerConfig::uniform(Duration::from_millis(1), Duration::from_millis(500))
}

pub fn spec(domain: &str) -> Result<ProvisioningSpec> {
    ProvisioningSpec::new(domain).with_context(|| format!("invalid test domain {domain}"))
}

pub fn converge(
    cloud: &InMemoryCloud,
    config: ProvisionerConfig,
    spec: &ProvisioningSpec,
) -> (ProvisioningReport, RecordingProgress) {
    let progress = RecordingProgress::new();
    let report = ProvisioningOrchestrator::new(cloud, config, &progress).converge(spec);
    (report, progress)
}

pub fn refresh(
    cloud: &InMemoryCloud,
    config: ProvisionerConfig,
    spec: &ProvisioningSpec,
    paths: &[String],
) -> ProvisioningReport {
    let progress = RecordingProgress::new();
    ProvisioningOrchestrator::new(cloud, config, &progress).refresh(spec, paths)
}

pub fn issued_certificate(id: &str, domain: &str) -> CertificateRecord {
    CertificateRecord {
        id: id.to_string(),
        domain: domain.to_string(),
        subject_alternative_names: vec![domain.to_string()],
        status: CertificateStatus::Issued,
        validation_records: Vec::new(),
        created_at: None,
        failure_reason: None,
    }
}

pub fn deployed_distribution(id: &str, alias: &str, certificate_id: &str) -> DistributionRecord {
    DistributionRecord {
        id: id.to_string(),
        domain_name: format!("{}.cdn.test", id.to_lowercase()),
        aliases: vec![alias.to_string()],
        certificate_id: Some(certificate_id.to_string()),
        origin_domain: Some(format!("{alias}.website.storage.test")),
        status: DistributionStatus::Deployed,
    }
}

/// Small build directory with an index page and a nested stylesheet.
pub fn site_dir() -> Result<TempDir> {
    let dir = tempfile::tempdir().context("failed to create site dir")?;
    fs::create_dir_all(dir.path().join("css"))?;
    fs::write(dir.path().join("index.html"), "<h1>hello</h1>")?;
    fs::write(dir.path().join("css/site.css"), "h1 { color: red }")?;
    Ok(dir)
}

pub fn expect_done(report: &ProvisioningReport) -> Result<()> {
    if report.is_done() {
        Ok(())
    } else {
        Err(anyhow!(
            "expected {} to be done, got {} ({:?})",
            report.domain,
            report.state,
            report.error
        ))
    }
}
