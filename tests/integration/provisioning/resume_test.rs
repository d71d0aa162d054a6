use std::time::Duration;

use anyhow::{Result, anyhow};

use site_provisioner::cloud::{CertificateScript, ClientError, Operation};
use site_provisioner::provisioning::{PollPolicy, RecordingProgress};
use site_provisioner::{
    CancellationToken, InMemoryCloud, ProvisionError, ProvisioningOrchestrator, ProvisioningState,
};

use super::test_utils::{DOMAIN, converge, expect_done, fast_config, spec};

#[test]
fn timed_out_run_resumes_without_new_request() -> Result<()> {
    let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::issued_after(3));
    let spec = spec(DOMAIN)?;

    // a zero issuance timeout gives up after a single probe
    let mut impatient = fast_config();
    impatient.issuance_poll = PollPolicy::fixed(Duration::from_millis(1), Duration::ZERO);
    let (first, _) = converge(&cloud, impatient, &spec);

    assert_eq!(first.state, ProvisioningState::OriginReady);
    assert!(first.is_resumable());
    match &first.error {
        Some(ProvisionError::PollTimeout { last_observed, .. }) => {
            assert_eq!(last_observed, "PENDING_VALIDATION");
        }
        other => return Err(anyhow!("expected poll timeout, got {other:?}")),
    }

    let (second, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&second)?;
    assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    assert_eq!(cloud.calls(Operation::CreateBucket), 1);
    Ok(())
}

#[test]
fn pending_certificate_is_adopted_on_every_run() -> Result<()> {
    let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::pending_forever());
    let spec = spec(DOMAIN)?;
    let config = site_provisioner::ProvisionerConfig::uniform(
        Duration::from_millis(1),
        Duration::from_millis(10),
    );

    for _ in 0..2 {
        let (report, _) = converge(&cloud, config.clone(), &spec);
        assert!(report.is_resumable(), "{:?}", report.error);
        assert_eq!(report.state, ProvisioningState::OriginReady);
    }
    assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    assert_eq!(cloud.calls(Operation::CreateDistribution), 0);
    Ok(())
}

#[test]
fn transient_outage_halts_then_resumes() -> Result<()> {
    let cloud = InMemoryCloud::new();
    cloud.fail_next(
        Operation::ListDistributions,
        ClientError::unavailable("cdn", "connection reset"),
    );
    let spec = spec(DOMAIN)?;

    let (first, _) = converge(&cloud, fast_config(), &spec);
    assert_eq!(first.state, ProvisioningState::CertificateReady);
    assert!(matches!(
        first.error,
        Some(ProvisionError::TransientRemote { .. })
    ));

    let (second, _) = converge(&cloud, fast_config(), &spec);
    expect_done(&second)?;
    assert_eq!(cloud.calls(Operation::RequestCertificate), 1);
    assert_eq!(cloud.calls(Operation::CreateDistribution), 1);
    Ok(())
}

#[test]
fn cancellation_stops_waiting_promptly() -> Result<()> {
    let cloud = InMemoryCloud::new().with_certificate_script(CertificateScript::pending_forever());
    let token = CancellationToken::new();
    let progress = RecordingProgress::new();
    let orchestrator = ProvisioningOrchestrator::new(
        &cloud,
        site_provisioner::ProvisionerConfig::default(),
        &progress,
    )
    .with_cancellation(token.clone());

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let started = std::time::Instant::now();
    let report = orchestrator.converge(&spec(DOMAIN)?);
    canceller
        .join()
        .map_err(|_| anyhow!("cancel thread panicked"))?;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(report.error, Some(ProvisionError::Cancelled { .. })));
    assert!(report.is_resumable());
    Ok(())
}
