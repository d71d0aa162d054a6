//! Converges a static website's storage origin, DNS-validated TLS
//! certificate and CDN distribution for one domain.

pub mod cloud;
pub mod core;
pub mod domain;
pub mod provisioning;

pub use crate::cloud::{
    AwsResourceClient, CertificateAuthority, ClientError, ContentDelivery, InMemoryCloud,
    ObjectStorage, ResourceClient,
};
pub use crate::core::config::ProvisionerConfig;
pub use crate::core::types::ProvisioningSpec;
pub use crate::provisioning::{
    CancellationToken, ProgressEvent, ProgressSink, ProvisionError, ProvisioningOrchestrator,
    ProvisioningReport, ProvisioningState, converge_all,
};
