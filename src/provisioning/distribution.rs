use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::cloud::ContentDelivery;
use crate::core::config::ProvisionerConfig;
use crate::core::types::{
    CacheBehaviorConfig, CertificateRecord, DistributionConfig, DistributionRecord,
    DistributionStatus, DnsInstruction, DnsPurpose, HttpMethod, InvalidationRequest,
    InvalidationStatus, OriginConfig, OriginProtocolPolicy, OriginRecord, ProvisioningSpec,
    ViewerCertificateConfig, ViewerProtocolPolicy,
};
use crate::domain::{relative_record_name, same_domain};

use super::error::ProvisionError;
use super::poller::{ConvergencePoller, PollPolicy, PollResult};
use super::progress::{ProgressEvent, ProgressSink, ProvisioningWarning};
use super::settle;

const DEFAULT_INVALIDATION_PATH: &str = "/*";
const MINIMUM_PROTOCOL_VERSION: &str = "TLSv1.2_2021";

/// Finds, creates and refreshes the CDN distribution serving a domain.
pub struct DistributionProvisioner<'a, D: ContentDelivery + ?Sized> {
    cdn: &'a D,
    poller: &'a ConvergencePoller,
    deployment_poll: PollPolicy,
    invalidation_poll: PollPolicy,
    progress: &'a dyn ProgressSink,
}

impl<'a, D: ContentDelivery + ?Sized> DistributionProvisioner<'a, D> {
    pub fn new(
        cdn: &'a D,
        poller: &'a ConvergencePoller,
        config: &ProvisionerConfig,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            cdn,
            poller,
            deployment_poll: config.deployment_poll,
            invalidation_poll: config.invalidation_poll,
            progress,
        }
    }

    /// First distribution whose aliases include `domain`.
    pub fn find_distribution(&self, domain: &str) -> Result<Option<DistributionRecord>, ProvisionError> {
        let distributions = self
            .cdn
            .list_distributions()
            .map_err(|err| ProvisionError::remote("list_distributions", err))?;
        Ok(distributions
            .into_iter()
            .find(|distribution| distribution.serves(domain)))
    }

    /// Reuses the distribution aliased to the domain or creates one bound to
    /// `certificate` and `origin`. An existing one is never modified.
    pub fn ensure_distribution(
        &self,
        spec: &ProvisioningSpec,
        certificate: &CertificateRecord,
        origin: &OriginRecord,
    ) -> Result<DistributionRecord, ProvisionError> {
        if let Some(existing) = self.find_distribution(&spec.domain)? {
            info!(
                "[distribution] {} already serves {} ({})",
                existing.id, spec.domain, existing.status
            );
            for warning in binding_conflicts(&existing, certificate, origin) {
                warn!("[distribution] {}", warning);
            }
            self.progress.emit(&ProgressEvent::DistributionReused {
                distribution_id: existing.id.clone(),
            });
            return Ok(existing);
        }

        let config = distribution_config(
            spec,
            &certificate.id,
            &origin.website_endpoint,
            &caller_reference(),
        );
        info!(
            "[distribution] creating distribution for {} from {}",
            spec.domain, origin.website_endpoint
        );
        let created = self
            .cdn
            .create_distribution(&config)
            .map_err(|err| ProvisionError::remote("create_distribution", err))?;
        info!(
            "[distribution] created {} at {}",
            created.id, created.domain_name
        );
        self.progress.emit(&ProgressEvent::DistributionCreated {
            distribution_id: created.id.clone(),
            domain_name: created.domain_name.clone(),
        });
        Ok(created)
    }

    pub fn wait_until_deployed(&self, distribution_id: &str) -> Result<DistributionRecord, ProvisionError> {
        self.progress.emit(&ProgressEvent::AwaitingDeployment {
            distribution_id: distribution_id.to_string(),
        });
        let mut last_observed = DistributionStatus::InProgress.to_string();
        let outcome = self.poller.poll_until("distribution deployment", &self.deployment_poll, || {
            match self.cdn.get_distribution(distribution_id) {
                Ok(record) => {
                    last_observed = record.status.to_string();
                    match record.status {
                        DistributionStatus::Deployed => PollResult::Ready(record),
                        DistributionStatus::Disabled => {
                            PollResult::Failed(ProvisionError::DistributionDisabled {
                                distribution_id: record.id,
                            })
                        }
                        DistributionStatus::InProgress => PollResult::NotYet,
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!("[distribution] get {} failed: {}", distribution_id, err);
                    PollResult::NotYet
                }
                Err(err) => PollResult::Failed(ProvisionError::remote("get_distribution", err)),
            }
        });
        let deployed = settle(
            outcome,
            format!("deployment of distribution {distribution_id}"),
            last_observed,
        )?;
        info!("[distribution] {} deployed", deployed.id);
        Ok(deployed)
    }

    /// Submits a cache invalidation. Empty `paths` means everything.
    pub fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<InvalidationRequest, ProvisionError> {
        let paths = invalidation_paths(paths)?;
        let reference = caller_reference();
        info!(
            "[distribution] invalidating {:?} on {} ({})",
            paths, distribution_id, reference
        );
        let request = self
            .cdn
            .create_invalidation(distribution_id, &paths, &reference)
            .map_err(|err| ProvisionError::remote("create_invalidation", err))?;
        self.progress.emit(&ProgressEvent::InvalidationCreated {
            distribution_id: distribution_id.to_string(),
            invalidation_id: request.id.clone(),
            paths: request.paths.clone(),
        });
        Ok(request)
    }

    pub fn wait_for_invalidation(
        &self,
        distribution_id: &str,
        invalidation_id: &str,
    ) -> Result<InvalidationRequest, ProvisionError> {
        let mut last_observed = "Pending".to_string();
        let outcome = self.poller.poll_until("invalidation", &self.invalidation_poll, || {
            match self.cdn.get_invalidation(distribution_id, invalidation_id) {
                Ok(request) if request.status == InvalidationStatus::Completed => {
                    PollResult::Ready(request)
                }
                Ok(request) => {
                    last_observed = format!("{:?}", request.status);
                    PollResult::NotYet
                }
                Err(err) if err.is_transient() => {
                    warn!("[distribution] get invalidation {} failed: {}", invalidation_id, err);
                    PollResult::NotYet
                }
                Err(err) => PollResult::Failed(ProvisionError::remote("get_invalidation", err)),
            }
        });
        settle(
            outcome,
            format!("invalidation {invalidation_id} on {distribution_id}"),
            last_observed,
        )
    }
}

/// Desired configuration of a new distribution for `spec`.
pub fn distribution_config(
    spec: &ProvisioningSpec,
    certificate_id: &str,
    origin_endpoint: &str,
    caller_reference: &str,
) -> DistributionConfig {
    let origin_id = format!("S3-{}", spec.origin_id);
    let allowed_methods: Vec<HttpMethod> = spec
        .allowed_methods
        .iter()
        .copied()
        .filter(HttpMethod::is_read_only)
        .collect();

    DistributionConfig {
        caller_reference: caller_reference.to_string(),
        comment: format!("Static site for {}", spec.domain),
        aliases: vec![spec.domain.clone()],
        default_root_object: spec.default_root_object.clone(),
        origin: OriginConfig {
            id: origin_id.clone(),
            domain_name: origin_endpoint.to_string(),
            http_port: 80,
            https_port: 443,
            // website endpoints only speak plain HTTP
            protocol_policy: OriginProtocolPolicy::HttpOnly,
        },
        default_cache_behavior: CacheBehaviorConfig {
            target_origin_id: origin_id,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            cached_methods: allowed_methods.clone(),
            allowed_methods,
            forward_query_string: spec.cache_policy.forward_query_string,
            forward_cookies: spec.cache_policy.forward_cookies,
            min_ttl: spec.cache_policy.min_ttl,
        },
        viewer_certificate: ViewerCertificateConfig {
            certificate_id: certificate_id.to_string(),
            ssl_support_method: "sni-only".to_string(),
            minimum_protocol_version: MINIMUM_PROTOCOL_VERSION.to_string(),
        },
        enabled: true,
    }
}

/// Differences between an existing distribution and what this run would bind.
pub fn binding_conflicts(
    distribution: &DistributionRecord,
    certificate: &CertificateRecord,
    origin: &OriginRecord,
) -> Vec<ProvisioningWarning> {
    let mut warnings = Vec::new();
    if let Some(bound) = &distribution.certificate_id
        && bound != &certificate.id
    {
        warnings.push(ProvisioningWarning::ConflictingResourceState {
            resource: format!("distribution {}", distribution.id),
            detail: format!("uses certificate {bound}, expected {}", certificate.id),
        });
    }
    if let Some(bound) = &distribution.origin_domain
        && !same_domain(bound, &origin.website_endpoint)
    {
        warnings.push(ProvisioningWarning::ConflictingResourceState {
            resource: format!("distribution {}", distribution.id),
            detail: format!(
                "uses origin {bound}, expected {}",
                origin.website_endpoint
            ),
        });
    }
    warnings
}

/// CNAME the operator creates so the domain resolves to the distribution.
pub fn alias_instruction(domain: &str, distribution: &DistributionRecord) -> DnsInstruction {
    DnsInstruction {
        purpose: DnsPurpose::SiteAlias,
        record_type: "CNAME".to_string(),
        name: domain.to_string(),
        relative_name: relative_record_name(domain),
        value: distribution.domain_name.clone(),
    }
}

fn invalidation_paths(paths: &[String]) -> Result<Vec<String>, ProvisionError> {
    if paths.is_empty() {
        return Ok(vec![DEFAULT_INVALIDATION_PATH.to_string()]);
    }
    if let Some(bad) = paths.iter().find(|path| !path.starts_with('/')) {
        return Err(ProvisionError::InvalidSpec(format!(
            "invalidation path {bad:?} must start with '/'"
        )));
    }
    Ok(paths.to_vec())
}

/// Unique per call; a retried call with the same reference is deduplicated remotely.
fn caller_reference() -> String {
    let now = Utc::now();
    let nonce = Uuid::new_v4().as_simple().to_string();
    format!(
        "{}.{:06}-{}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        &nonce[..8]
    )
}
