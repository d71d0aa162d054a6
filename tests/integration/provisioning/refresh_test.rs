use anyhow::{Result, anyhow};

use site_provisioner::cloud::Operation;
use site_provisioner::core::types::InvalidationStatus;
use site_provisioner::{InMemoryCloud, ProvisionError, ProvisioningState};

use super::test_utils::{DOMAIN, converge, expect_done, fast_config, refresh, site_dir, spec};

#[test]
fn refresh_never_requests_or_creates() -> Result<()> {
    let cloud = InMemoryCloud::new();
    let dir = site_dir()?;
    let spec = spec(DOMAIN)?.with_site_dir(dir.path());
    let (provisioned, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&provisioned)?;

    let report = refresh(&cloud, fast_config(), &spec, &[]);
    expect_done(&report)?;

    assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    assert_eq!(cloud.calls(Operation::CreateDistribution), 1);
    assert_eq!(cloud.calls(Operation::ListCertificates), 1);
    assert_eq!(cloud.calls(Operation::PutObject), 4);

    let invalidation = report
        .invalidation
        .ok_or_else(|| anyhow!("no invalidation submitted"))?;
    assert_eq!(invalidation.paths, vec!["/*"]);
    Ok(())
}

#[test]
fn refresh_without_distribution_is_terminal() -> Result<()> {
    let cloud = InMemoryCloud::new();
    let report = refresh(&cloud, fast_config(), &spec(DOMAIN)?, &[]);

    assert_eq!(report.state, ProvisioningState::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionError::NotProvisioned { .. })
    ));
    assert_eq!(cloud.calls(Operation::CreateInvalidation), 0);
    assert_eq!(cloud.calls(Operation::RequestCertificate), 0);
    Ok(())
}

#[test]
fn refresh_can_wait_for_invalidation() -> Result<()> {
    let cloud = InMemoryCloud::new().with_invalidation_complete_after(2);
    let spec = spec(DOMAIN)?;
    let (provisioned, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&provisioned)?;

    let mut config = fast_config();
    config.wait_for_invalidation = true;
    let paths = vec!["/index.html".to_string(), "/css/*".to_string()];
    let report = refresh(&cloud, config, &spec, &paths);
    expect_done(&report)?;

    let invalidation = report
        .invalidation
        .ok_or_else(|| anyhow!("no invalidation submitted"))?;
    assert_eq!(invalidation.status, InvalidationStatus::Completed);
    assert_eq!(invalidation.paths, paths);
    assert_eq!(cloud.calls(Operation::GetInvalidation), 2);
    Ok(())
}

#[test]
fn refresh_rejects_relative_paths() -> Result<()> {
    let cloud = InMemoryCloud::new();
    let spec = spec(DOMAIN)?;
    let (provisioned, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&provisioned)?;

    let report = refresh(&cloud, fast_config(), &spec, &["index.html".to_string()]);
    assert_eq!(report.state, ProvisioningState::Failed);
    assert!(matches!(report.error, Some(ProvisionError::InvalidSpec(_))));
    assert_eq!(cloud.calls(Operation::CreateInvalidation), 0);
    Ok(())
}
