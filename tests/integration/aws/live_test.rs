use std::env;

use anyhow::{Context, Result, anyhow};

use site_provisioner::core::types::ProvisioningSpec;
use site_provisioner::provisioning::LogProgress;
use site_provisioner::{AwsResourceClient, ProvisionerConfig, ProvisioningOrchestrator};

struct LiveConfig {
    domain: String,
    region: Option<String>,
}

fn load_live_config() -> Result<LiveConfig> {
    let domain = env::var("SITE_PROVISIONER_TEST_DOMAIN")
        .context("SITE_PROVISIONER_TEST_DOMAIN not set")?;
    let region = env::var("SITE_PROVISIONER_TEST_REGION").ok();
    Ok(LiveConfig { domain, region })
}

/// Read-only: inspects whatever already exists for the test domain.
#[test]
fn aws_inspect_reports_consistent_state() -> Result<()> {
    let config = load_live_config()?;
    let client = AwsResourceClient::connect(config.region.as_deref())?;
    if let Some(region) = &config.region
        && client.region() != region
    {
        return Err(anyhow!("connected to {} instead of {}", client.region(), region));
    }
    let spec = ProvisioningSpec::new(&config.domain)?;

    let status = ProvisioningOrchestrator::new(&client, ProvisionerConfig::default(), &LogProgress)
        .inspect(&spec)?;

    if status.origin_exists != status.website_endpoint.is_some() {
        return Err(anyhow!(
            "origin_exists={} but website endpoint is {:?}",
            status.origin_exists,
            status.website_endpoint
        ));
    }
    if let Some(certificate) = &status.certificate
        && !certificate.covers(&spec.domain)
    {
        return Err(anyhow!(
            "certificate {} does not cover {}",
            certificate.id,
            spec.domain
        ));
    }
    if let Some(distribution) = &status.distribution
        && !distribution.serves(&spec.domain)
    {
        return Err(anyhow!(
            "distribution {} does not serve {}",
            distribution.id,
            spec.domain
        ));
    }
    Ok(())
}
