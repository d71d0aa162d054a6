use std::time::Duration;

use log::warn;
use serde::Serialize;

use crate::provisioning::poller::PollPolicy;

const ENV_PREFIX: &str = "SITE_PROVISIONER";

/// Poll cadences and wait behaviour for a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionerConfig {
    /// Waiting for the authority to publish DNS validation records.
    pub record_poll: PollPolicy,
    /// Waiting for the certificate to leave PENDING_VALIDATION.
    pub issuance_poll: PollPolicy,
    /// Waiting for a distribution to become Deployed.
    pub deployment_poll: PollPolicy,
    pub invalidation_poll: PollPolicy,
    pub wait_for_deployment: bool,
    pub wait_for_invalidation: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            record_poll: PollPolicy::fixed(Duration::from_secs(10), Duration::from_secs(600)),
            issuance_poll: PollPolicy::fixed(Duration::from_secs(30), Duration::from_secs(1800)),
            deployment_poll: PollPolicy::fixed(Duration::from_secs(30), Duration::from_secs(1800)),
            invalidation_poll: PollPolicy::fixed(Duration::from_secs(15), Duration::from_secs(900)),
            wait_for_deployment: true,
            wait_for_invalidation: false,
        }
    }
}

impl ProvisionerConfig {
    /// Defaults overridden by `SITE_PROVISIONER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            record_poll: policy_from_env("RECORD_POLL", defaults.record_poll),
            issuance_poll: policy_from_env("ISSUANCE_POLL", defaults.issuance_poll),
            deployment_poll: policy_from_env("DEPLOY_POLL", defaults.deployment_poll),
            invalidation_poll: policy_from_env("INVALIDATION_POLL", defaults.invalidation_poll),
            wait_for_deployment: resolve_flag("WAIT_FOR_DEPLOYMENT", defaults.wait_for_deployment),
            wait_for_invalidation: resolve_flag(
                "WAIT_FOR_INVALIDATION",
                defaults.wait_for_invalidation,
            ),
        }
    }

    /// Same interval and timeout for every wait; used by tests and dry runs.
    pub fn uniform(interval: Duration, timeout: Duration) -> Self {
        let policy = PollPolicy::fixed(interval, timeout);
        Self {
            record_poll: policy,
            issuance_poll: policy,
            deployment_poll: policy,
            invalidation_poll: policy,
            ..Self::default()
        }
    }
}

fn policy_from_env(name: &str, default: PollPolicy) -> PollPolicy {
    PollPolicy {
        interval: resolve_secs(&format!("{name}_INTERVAL_SECS"), default.interval),
        timeout: resolve_secs(&format!("{name}_TIMEOUT_SECS"), default.timeout),
        backoff: default.backoff,
    }
}

fn resolve_secs(name: &str, default: Duration) -> Duration {
    let key = format!("{ENV_PREFIX}_{name}");
    let Ok(raw) = std::env::var(&key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!("[config] invalid value {raw:?} for {key}; using default");
            default
        }
        Ok(secs) => Duration::from_secs(secs),
    }
}

fn resolve_flag(name: &str, default: bool) -> bool {
    let key = format!("{ENV_PREFIX}_{name}");
    let Ok(raw) = std::env::var(&key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("[config] invalid value {raw:?} for {key}; using default");
            default
        }
    }
}
