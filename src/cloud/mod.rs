//! Capability interface over the remote control plane.
//!
//! The provisioners only talk to these traits. `aws` binds them to S3, ACM
//! and CloudFront; `memory` is an in-process control plane with call
//! counters and scripted lifecycles.

use thiserror::Error;

use crate::core::types::{
    CertificateRecord, CertificateStatus, DistributionConfig, DistributionRecord,
    InvalidationRequest,
};

pub mod aws;
pub mod memory;

pub use aws::AwsResourceClient;
pub use memory::{CertificateScript, InMemoryCloud, Operation};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network or availability failure; retrying the step is safe.
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },
    /// Permission, validation or quota failure; retrying will not help.
    #[error("{service} rejected request: {message}")]
    Rejected { service: String, message: String },
}

impl ClientError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        ClientError::Unavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        ClientError::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub fn rejected(service: &str, message: impl Into<String>) -> Self {
        ClientError::Rejected {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unavailable { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Object storage hosting the site files.
pub trait ObjectStorage: Send + Sync {
    /// `Ok(false)` only for a definite "no such bucket"; every other failure is an error.
    fn bucket_exists(&self, bucket: &str) -> ClientResult<bool>;
    fn create_bucket(&self, bucket: &str) -> ClientResult<()>;
    /// Enables website hosting with public read access. Safe to repeat.
    fn configure_static_hosting(
        &self,
        bucket: &str,
        index_document: &str,
        error_document: &str,
    ) -> ClientResult<()>;
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<()>;
    /// Public website hostname of the bucket.
    fn website_endpoint(&self, bucket: &str) -> String;
}

/// Certificate authority issuing DNS-validated certificates.
pub trait CertificateAuthority: Send + Sync {
    /// Summaries of certificates in any of `statuses`; validation records may be absent.
    fn list_certificates(&self, statuses: &[CertificateStatus])
    -> ClientResult<Vec<CertificateRecord>>;
    fn request_certificate(&self, domain: &str) -> ClientResult<CertificateRecord>;
    fn describe_certificate(&self, certificate_id: &str) -> ClientResult<CertificateRecord>;
}

/// CDN fronting the origin.
pub trait ContentDelivery: Send + Sync {
    fn list_distributions(&self) -> ClientResult<Vec<DistributionRecord>>;
    fn create_distribution(&self, config: &DistributionConfig) -> ClientResult<DistributionRecord>;
    fn get_distribution(&self, distribution_id: &str) -> ClientResult<DistributionRecord>;
    fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> ClientResult<InvalidationRequest>;
    fn get_invalidation(
        &self,
        distribution_id: &str,
        invalidation_id: &str,
    ) -> ClientResult<InvalidationRequest>;
}

/// Everything the orchestrator needs from one control plane.
pub trait ResourceClient: ObjectStorage + CertificateAuthority + ContentDelivery {}

impl<T> ResourceClient for T where T: ObjectStorage + CertificateAuthority + ContentDelivery {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(ClientError::unavailable("s3", "timeout").is_transient());
        assert!(!ClientError::not_found("bucket", "site").is_transient());
        assert!(!ClientError::rejected("acm", "AccessDenied").is_transient());
    }

    #[test]
    fn messages_name_the_service() {
        let err = ClientError::rejected("cloudfront", "CNAMEAlreadyExists");
        assert_eq!(
            err.to_string(),
            "cloudfront rejected request: CNAMEAlreadyExists"
        );
    }
}
