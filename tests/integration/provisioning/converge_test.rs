use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use site_provisioner::cloud::{
    CertificateAuthority, CertificateScript, ClientError, ClientResult, ContentDelivery,
    ObjectStorage, Operation,
};
use site_provisioner::core::types::{
    CertificateRecord, CertificateStatus, DistributionConfig, DistributionRecord, HttpMethod,
    InvalidationRequest, ViewerProtocolPolicy,
};
use site_provisioner::provisioning::{ProgressEvent, ProvisioningWarning};
use site_provisioner::{
    CancellationToken, InMemoryCloud, ProvisionError, ProvisioningState, converge_all,
};

use super::test_utils::{
    DOMAIN, converge, deployed_distribution, expect_done, fast_config, issued_certificate,
    site_dir, spec,
};

#[test]
fn happy_path_serves_domain_over_https() -> Result<()> {
    let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::issued_immediately());
    let (report, progress) = converge(&cloud, fast_config(), &spec(DOMAIN)?);
    expect_done(&report)?;

    let distribution = report
        .distribution
        .as_ref()
        .ok_or_else(|| anyhow!("report carries no distribution"))?;
    let config = cloud
        .distribution_config(&distribution.id)
        .ok_or_else(|| anyhow!("distribution {} was not created", distribution.id))?;

    assert_eq!(config.aliases, vec![DOMAIN]);
    assert_eq!(
        config.default_cache_behavior.allowed_methods,
        vec![HttpMethod::Get, HttpMethod::Head]
    );
    assert_eq!(
        config.default_cache_behavior.viewer_protocol_policy,
        ViewerProtocolPolicy::RedirectToHttps
    );
    assert_eq!(report.distribution_hostname(), Some(distribution.domain_name.as_str()));
    assert_eq!(cloud.calls(Operation::DescribeCertificate), 0);

    let alias_reported = progress.events().into_iter().any(|event| {
        matches!(event, ProgressEvent::AliasRequired(record) if record.value == distribution.domain_name)
    });
    if !alias_reported {
        return Err(anyhow!("alias instruction was not surfaced"));
    }
    Ok(())
}

#[test]
fn converging_twice_requests_one_certificate() -> Result<()> {
    let cloud = InMemoryCloud::new();
    let spec = spec(DOMAIN)?;

    let (first, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&first)?;
    let (second, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&second)?;

    assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    assert_eq!(cloud.calls(Operation::CreateDistribution), 1);
    assert_eq!(cloud.certificates().len(), 1);
    assert_eq!(
        first.certificate.map(|c| c.id),
        second.certificate.map(|c| c.id)
    );
    Ok(())
}

#[test]
fn existing_bucket_is_never_recreated() -> Result<()> {
    let cloud = InMemoryCloud::new();
    cloud.seed_bucket(DOMAIN);
    let spec = spec(DOMAIN)?;

    for _ in 0..2 {
        let (report, _) = converge(&cloud, fast_config(), &spec);
        expect_done(&report)?;
    }
    assert_eq!(cloud.calls(Operation::CreateBucket), 0);
    assert_eq!(cloud.calls(Operation::ConfigureStaticHosting), 2);
    Ok(())
}

#[test]
fn failed_certificate_never_reaches_distribution() -> Result<()> {
    let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::failed_after(1));
    let (report, _) = converge(&cloud, fast_config(), &spec(DOMAIN)?);

    assert_eq!(report.state, ProvisioningState::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionError::ValidationFailed { .. })
    ));
    assert!(!report.is_resumable());
    assert_eq!(cloud.calls(Operation::CreateDistribution), 0);
    assert_eq!(cloud.calls(Operation::ListDistributions), 0);
    Ok(())
}

#[test]
fn existing_alias_is_reused_among_many() -> Result<()> {
    let cloud = InMemoryCloud::new();
    cloud.seed_bucket(DOMAIN);
    cloud.seed_certificate(
        issued_certificate("cert-app", DOMAIN),
        CertificateScript::issued_immediately(),
    );
    cloud.seed_distribution(deployed_distribution("E1WWW", "www.example.com", "cert-www"));
    cloud.seed_distribution(deployed_distribution("E2APP", DOMAIN, "cert-app"));

    let (report, _) = converge(&cloud, fast_config(), &spec(DOMAIN)?);
    expect_done(&report)?;

    assert_eq!(report.distribution.map(|d| d.id).as_deref(), Some("E2APP"));
    assert_eq!(cloud.calls(Operation::CreateDistribution), 0);
    assert!(report.warnings.is_empty());
    Ok(())
}

#[test]
fn mismatched_binding_is_warned_not_changed() -> Result<()> {
    let cloud = InMemoryCloud::new();
    cloud.seed_certificate(
        issued_certificate("cert-new", DOMAIN),
        CertificateScript::issued_immediately(),
    );
    cloud.seed_distribution(deployed_distribution("E3APP", DOMAIN, "cert-old"));

    let (report, progress) = converge(&cloud, fast_config(), &spec(DOMAIN)?);
    expect_done(&report)?;

    assert_eq!(report.warnings.len(), 1);
    let ProvisioningWarning::ConflictingResourceState { detail, .. } = &report.warnings[0];
    assert!(detail.contains("cert-old"), "{detail}");
    assert_eq!(
        cloud.distributions()[0].certificate_id.as_deref(),
        Some("cert-old")
    );
    assert!(
        progress
            .events()
            .iter()
            .any(|event| matches!(event, ProgressEvent::Warning(_)))
    );
    Ok(())
}

#[test]
fn waits_for_deployment_when_configured() -> Result<()> {
    let cloud = InMemoryCloud::new().with_deploy_after(3);
    let (report, _) = converge(&cloud, fast_config(), &spec(DOMAIN)?);
    expect_done(&report)?;
    assert_eq!(cloud.calls(Operation::GetDistribution), 3);

    let cloud = InMemoryCloud::new().with_deploy_after(3);
    let mut config = fast_config();
    config.wait_for_deployment = false;
    let (report, _) = converge(&cloud, config, &spec(DOMAIN)?);
    expect_done(&report)?;
    assert_eq!(cloud.calls(Operation::GetDistribution), 0);
    Ok(())
}

#[test]
fn publishes_site_content_before_certificate() -> Result<()> {
    let dir = site_dir()?;
    let cloud = InMemoryCloud::new();
    let spec = spec(DOMAIN)?.with_site_dir(dir.path());

    let (report, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&report)?;

    let upload = report
        .upload
        .ok_or_else(|| anyhow!("no upload summary"))?;
    assert_eq!(upload.files, 2);
    let (_, content_type) = cloud
        .object(DOMAIN, "css/site.css")
        .ok_or_else(|| anyhow!("stylesheet not uploaded"))?;
    assert_eq!(content_type, "text/css");
    Ok(())
}

#[test]
fn rejected_bucket_probe_fails_without_creating() -> Result<()> {
    let cloud = InMemoryCloud::new();
    cloud.fail_next(
        Operation::BucketExists,
        ClientError::rejected("storage", "AccessDenied"),
    );
    let (report, _) = converge(&cloud, fast_config(), &spec(DOMAIN)?);

    assert_eq!(report.state, ProvisioningState::Failed);
    assert_eq!(cloud.calls(Operation::CreateBucket), 0);
    assert_eq!(cloud.calls(Operation::RequestCertificate), 0);
    Ok(())
}

#[test]
fn domains_converge_concurrently() -> Result<()> {
    let cloud = InMemoryCloud::new();
    let specs = vec![
        spec("a.example.com")?,
        spec("b.example.com")?,
        spec("c.example.com")?,
        spec("d.example.com")?,
    ];
    let progress = site_provisioner::provisioning::RecordingProgress::new();

    let reports = converge_all(
        &cloud,
        &fast_config(),
        &specs,
        &progress,
        &CancellationToken::new(),
    );
    for report in &reports {
        expect_done(report)?;
    }
    assert_eq!(cloud.calls(Operation::RequestCertificate), 4);
    assert_eq!(cloud.distributions().len(), 4);
    assert!(
        cloud
            .certificates()
            .iter()
            .all(|c| c.status == CertificateStatus::Issued)
    );
    Ok(())
}

/// Delays certificate listings so concurrent runs overlap between find and request.
struct SlowListing {
    inner: InMemoryCloud,
    delay: Duration,
}

impl ObjectStorage for SlowListing {
    fn bucket_exists(&self, bucket: &str) -> ClientResult<bool> {
        self.inner.bucket_exists(bucket)
    }
    fn create_bucket(&self, bucket: &str) -> ClientResult<()> {
        self.inner.create_bucket(bucket)
    }
    fn configure_static_hosting(
        &self,
        bucket: &str,
        index_document: &str,
        error_document: &str,
    ) -> ClientResult<()> {
        self.inner
            .configure_static_hosting(bucket, index_document, error_document)
    }
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<()> {
        self.inner.put_object(bucket, key, body, content_type)
    }
    fn website_endpoint(&self, bucket: &str) -> String {
        self.inner.website_endpoint(bucket)
    }
}

impl CertificateAuthority for SlowListing {
    fn list_certificates(
        &self,
        statuses: &[CertificateStatus],
    ) -> ClientResult<Vec<CertificateRecord>> {
        thread::sleep(self.delay);
        self.inner.list_certificates(statuses)
    }
    fn request_certificate(&self, domain: &str) -> ClientResult<CertificateRecord> {
        self.inner.request_certificate(domain)
    }
    fn describe_certificate(&self, certificate_id: &str) -> ClientResult<CertificateRecord> {
        self.inner.describe_certificate(certificate_id)
    }
}

impl ContentDelivery for SlowListing {
    fn list_distributions(&self) -> ClientResult<Vec<DistributionRecord>> {
        self.inner.list_distributions()
    }
    fn create_distribution(&self, config: &DistributionConfig) -> ClientResult<DistributionRecord> {
        self.inner.create_distribution(config)
    }
    fn get_distribution(&self, distribution_id: &str) -> ClientResult<DistributionRecord> {
        self.inner.get_distribution(distribution_id)
    }
    fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> ClientResult<InvalidationRequest> {
        self.inner
            .create_invalidation(distribution_id, paths, caller_reference)
    }
    fn get_invalidation(
        &self,
        distribution_id: &str,
        invalidation_id: &str,
    ) -> ClientResult<InvalidationRequest> {
        self.inner.get_invalidation(distribution_id, invalidation_id)
    }
}

#[test]
fn repeated_domain_is_converged_once() -> Result<()> {
    let cloud = SlowListing {
        inner: InMemoryCloud::new(),
        delay: Duration::from_millis(50),
    };
    let specs = vec![spec(DOMAIN)?, spec("other.example.com")?, spec(DOMAIN)?];
    let progress = site_provisioner::provisioning::RecordingProgress::new();

    let reports = converge_all(
        &cloud,
        &fast_config(),
        &specs,
        &progress,
        &CancellationToken::new(),
    );

    let domains: Vec<&str> = reports.iter().map(|r| r.domain.as_str()).collect();
    assert_eq!(domains, vec![DOMAIN, "other.example.com"]);
    for report in &reports {
        expect_done(report)?;
    }
    assert_eq!(cloud.inner.calls(Operation::RequestCertificate), 2);
    assert_eq!(cloud.inner.certificates().len(), 2);
    assert_eq!(cloud.inner.distributions().len(), 2);
    Ok(())
}
