//! AWS binding: S3 website buckets, ACM certificates, CloudFront distributions.
//!
//! The SDK is async; every call is driven to completion on a runtime owned by
//! the client so the provisioners stay synchronous.

use std::error::Error as StdError;
use std::fmt::Debug;

use aws_config::BehaviorVersion;
use aws_sdk_acm::types::{
    CertificateDetail, CertificateStatus as AcmStatus, CertificateSummary, DomainValidation,
    ValidationMethod,
};
use aws_sdk_cloudfront::types::{
    Aliases, AllowedMethods, CachedMethods, CookiePreference, CustomOriginConfig,
    DefaultCacheBehavior, Distribution, DistributionConfig as CfDistributionConfig,
    DistributionSummary, ForwardedValues, Invalidation, InvalidationBatch, ItemSelection, Method,
    MinimumProtocolVersion, Origin, OriginProtocolPolicy as CfOriginProtocolPolicy, Origins,
    Paths, SslSupportMethod, ViewerCertificate, ViewerProtocolPolicy as CfViewerProtocolPolicy,
};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, ErrorDocument, IndexDocument,
    WebsiteConfiguration,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use super::{
    CertificateAuthority, ClientError, ClientResult, ContentDelivery, ObjectStorage,
};
use crate::core::types::{
    CertificateRecord, CertificateStatus, DistributionConfig, DistributionRecord,
    DistributionStatus, HttpMethod, InvalidationRequest, InvalidationStatus, ValidationRecord,
    ValidationStatus,
};

/// CloudFront only accepts viewer certificates issued in this region.
const CERTIFICATE_REGION: &str = "us-east-1";

/// Error codes AWS uses for throttling and transient server-side failures.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "RequestTimeout",
];

pub struct AwsResourceClient {
    runtime: tokio::runtime::Runtime,
    s3: aws_sdk_s3::Client,
    acm: aws_sdk_acm::Client,
    cloudfront: aws_sdk_cloudfront::Client,
    region: String,
}

impl AwsResourceClient {
    /// Loads credentials from the default provider chain. `region` overrides
    /// the bucket region; certificates always live in us-east-1.
    pub fn connect(region: Option<&str>) -> ClientResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::unavailable("aws", format!("failed to start runtime: {e}")))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.to_string()));
        }
        let shared = runtime.block_on(loader.load());

        let region = shared
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| CERTIFICATE_REGION.to_string());

        let s3 = aws_sdk_s3::Client::new(&shared);
        let acm_config = aws_sdk_acm::config::Builder::from(&shared)
            .region(aws_sdk_acm::config::Region::new(CERTIFICATE_REGION))
            .build();
        let acm = aws_sdk_acm::Client::from_conf(acm_config);
        let cloudfront = aws_sdk_cloudfront::Client::new(&shared);

        info!("[aws] connected (bucket region {region}, certificate region {CERTIFICATE_REGION})");
        Ok(Self {
            runtime,
            s3,
            acm,
            cloudfront,
            region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Maps SDK failures onto the capability taxonomy: dispatch and timeout
/// failures and throttling codes are transient, every other service error is a rejection.
fn classify<E, R>(service: &str, err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ClientError::unavailable(service, message)
        }
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or_default();
            if TRANSIENT_CODES.contains(&code) {
                ClientError::unavailable(service, message)
            } else {
                ClientError::rejected(service, message)
            }
        }
        SdkError::ConstructionFailure(_) => ClientError::rejected(service, message),
        _ => ClientError::unavailable(service, message),
    }
}

fn build_error(service: &str, what: &str, err: impl std::fmt::Display) -> ClientError {
    ClientError::rejected(service, format!("failed to build {what}: {err}"))
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

fn certificate_status(status: Option<&AcmStatus>) -> CertificateStatus {
    match status.map(|s| s.as_str()) {
        Some("ISSUED") => CertificateStatus::Issued,
        Some("PENDING_VALIDATION") => CertificateStatus::PendingValidation,
        Some("FAILED") | Some("VALIDATION_TIMED_OUT") | Some("REVOKED") | Some("EXPIRED")
        | Some("INACTIVE") => CertificateStatus::Failed,
        _ => CertificateStatus::Requested,
    }
}

fn acm_status(status: CertificateStatus) -> Option<AcmStatus> {
    match status {
        CertificateStatus::Issued => Some(AcmStatus::Issued),
        CertificateStatus::PendingValidation => Some(AcmStatus::PendingValidation),
        CertificateStatus::Failed => Some(AcmStatus::Failed),
        // ACM has no separate "requested" state.
        CertificateStatus::Requested => None,
    }
}

fn summary_to_record(summary: &CertificateSummary) -> Option<CertificateRecord> {
    let id = summary.certificate_arn()?.to_string();
    let domain = summary.domain_name().unwrap_or_default().to_string();
    let mut sans: Vec<String> = summary.subject_alternative_name_summaries().to_vec();
    if sans.is_empty() && !domain.is_empty() {
        sans.push(domain.clone());
    }
    Some(CertificateRecord {
        id,
        domain,
        subject_alternative_names: sans,
        status: certificate_status(summary.status()),
        validation_records: Vec::new(),
        created_at: summary.created_at().and_then(to_chrono),
        failure_reason: None,
    })
}

fn validation_record(option: &DomainValidation) -> Option<ValidationRecord> {
    let record = option.resource_record()?;
    let status = match option.validation_status().map(|s| s.as_str()) {
        Some("SUCCESS") => ValidationStatus::Success,
        Some("FAILED") => ValidationStatus::Failed,
        _ => ValidationStatus::PendingValidation,
    };
    Some(ValidationRecord {
        domain: option.domain_name().to_string(),
        record_type: record.r#type().as_str().to_string(),
        name: record.name().to_string(),
        value: record.value().to_string(),
        status,
    })
}

fn detail_to_record(id: &str, detail: &CertificateDetail) -> CertificateRecord {
    let domain = detail.domain_name().unwrap_or_default().to_string();
    let mut sans: Vec<String> = detail.subject_alternative_names().to_vec();
    if sans.is_empty() && !domain.is_empty() {
        sans.push(domain.clone());
    }
    CertificateRecord {
        id: detail.certificate_arn().unwrap_or(id).to_string(),
        domain,
        subject_alternative_names: sans,
        status: certificate_status(detail.status()),
        validation_records: detail
            .domain_validation_options()
            .iter()
            .filter_map(validation_record)
            .collect(),
        created_at: detail.created_at().and_then(to_chrono),
        failure_reason: detail.failure_reason().map(|r| r.as_str().to_string()),
    }
}

fn distribution_status(status: &str, enabled: bool) -> DistributionStatus {
    if !enabled {
        return DistributionStatus::Disabled;
    }
    match status {
        "Deployed" => DistributionStatus::Deployed,
        _ => DistributionStatus::InProgress,
    }
}

fn summary_to_distribution(summary: &DistributionSummary) -> DistributionRecord {
    DistributionRecord {
        id: summary.id().to_string(),
        domain_name: summary.domain_name().to_string(),
        aliases: summary
            .aliases()
            .map(|a| a.items().to_vec())
            .unwrap_or_default(),
        certificate_id: summary
            .viewer_certificate()
            .and_then(|v| v.acm_certificate_arn())
            .map(str::to_string),
        origin_domain: summary
            .origins()
            .and_then(|o| o.items().first())
            .map(|o| o.domain_name().to_string()),
        status: distribution_status(summary.status(), summary.enabled()),
    }
}

fn distribution_to_record(distribution: &Distribution) -> DistributionRecord {
    let config = distribution.distribution_config();
    DistributionRecord {
        id: distribution.id().to_string(),
        domain_name: distribution.domain_name().to_string(),
        aliases: config
            .and_then(|c| c.aliases())
            .map(|a| a.items().to_vec())
            .unwrap_or_default(),
        certificate_id: config
            .and_then(|c| c.viewer_certificate())
            .and_then(|v| v.acm_certificate_arn())
            .map(str::to_string),
        origin_domain: config
            .and_then(|c| c.origins())
            .and_then(|o| o.items().first())
            .map(|o| o.domain_name().to_string()),
        status: distribution_status(
            distribution.status(),
            config.map(|c| c.enabled()).unwrap_or(true),
        ),
    }
}

fn invalidation_to_request(distribution_id: &str, invalidation: &Invalidation) -> InvalidationRequest {
    let batch = invalidation.invalidation_batch();
    InvalidationRequest {
        id: invalidation.id().to_string(),
        distribution_id: distribution_id.to_string(),
        paths: batch
            .and_then(|b| b.paths())
            .map(|p| p.items().to_vec())
            .unwrap_or_default(),
        caller_reference: batch
            .map(|b| b.caller_reference().to_string())
            .unwrap_or_default(),
        status: match invalidation.status() {
            "Completed" => InvalidationStatus::Completed,
            _ => InvalidationStatus::Pending,
        },
        created_at: to_chrono(invalidation.create_time()),
    }
}

fn cloudfront_methods(methods: &[HttpMethod]) -> Vec<Method> {
    methods.iter().map(|m| Method::from(m.as_str())).collect()
}

// ForwardedValues and MinTTL are the legacy cache settings; cache policies are not used.
#[allow(deprecated)]
fn cloudfront_config(config: &DistributionConfig) -> ClientResult<CfDistributionConfig> {
    const SERVICE: &str = "cloudfront";

    let origin = Origin::builder()
        .id(&config.origin.id)
        .domain_name(&config.origin.domain_name)
        .custom_origin_config(
            CustomOriginConfig::builder()
                .http_port(i32::from(config.origin.http_port))
                .https_port(i32::from(config.origin.https_port))
                .origin_protocol_policy(CfOriginProtocolPolicy::from(
                    config.origin.protocol_policy.as_str(),
                ))
                .build()
                .map_err(|e| build_error(SERVICE, "CustomOriginConfig", e))?,
        )
        .build()
        .map_err(|e| build_error(SERVICE, "Origin", e))?;

    let behavior = &config.default_cache_behavior;
    let allowed = cloudfront_methods(&behavior.allowed_methods);
    let cached = cloudfront_methods(&behavior.cached_methods);
    let allowed_methods = AllowedMethods::builder()
        .quantity(allowed.len() as i32)
        .set_items(Some(allowed))
        .cached_methods(
            CachedMethods::builder()
                .quantity(cached.len() as i32)
                .set_items(Some(cached))
                .build()
                .map_err(|e| build_error(SERVICE, "CachedMethods", e))?,
        )
        .build()
        .map_err(|e| build_error(SERVICE, "AllowedMethods", e))?;

    let forwarded = ForwardedValues::builder()
        .query_string(behavior.forward_query_string)
        .cookies(
            CookiePreference::builder()
                .forward(if behavior.forward_cookies {
                    ItemSelection::All
                } else {
                    ItemSelection::None
                })
                .build()
                .map_err(|e| build_error(SERVICE, "CookiePreference", e))?,
        )
        .build()
        .map_err(|e| build_error(SERVICE, "ForwardedValues", e))?;

    let default_cache_behavior = DefaultCacheBehavior::builder()
        .target_origin_id(&behavior.target_origin_id)
        .viewer_protocol_policy(CfViewerProtocolPolicy::from(
            behavior.viewer_protocol_policy.as_str(),
        ))
        .allowed_methods(allowed_methods)
        .forwarded_values(forwarded)
        .min_ttl(behavior.min_ttl as i64)
        .build()
        .map_err(|e| build_error(SERVICE, "DefaultCacheBehavior", e))?;

    let viewer_certificate = ViewerCertificate::builder()
        .acm_certificate_arn(&config.viewer_certificate.certificate_id)
        .ssl_support_method(SslSupportMethod::from(
            config.viewer_certificate.ssl_support_method.as_str(),
        ))
        .minimum_protocol_version(MinimumProtocolVersion::from(
            config.viewer_certificate.minimum_protocol_version.as_str(),
        ))
        .build();

    CfDistributionConfig::builder()
        .caller_reference(&config.caller_reference)
        .comment(&config.comment)
        .aliases(
            Aliases::builder()
                .quantity(config.aliases.len() as i32)
                .set_items(Some(config.aliases.clone()))
                .build()
                .map_err(|e| build_error(SERVICE, "Aliases", e))?,
        )
        .default_root_object(&config.default_root_object)
        .origins(
            Origins::builder()
                .quantity(1)
                .items(origin)
                .build()
                .map_err(|e| build_error(SERVICE, "Origins", e))?,
        )
        .default_cache_behavior(default_cache_behavior)
        .viewer_certificate(viewer_certificate)
        .enabled(config.enabled)
        .build()
        .map_err(|e| build_error(SERVICE, "DistributionConfig", e))
}

impl ObjectStorage for AwsResourceClient {
    fn bucket_exists(&self, bucket: &str) -> ClientResult<bool> {
        let result = self
            .runtime
            .block_on(self.s3.head_bucket().bucket(bucket).send());
        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(context))
                if context.err().is_not_found() || context.raw().status().as_u16() == 404 =>
            {
                debug!("[aws] bucket {bucket} does not exist");
                Ok(false)
            }
            Err(err) => Err(classify("s3", err)),
        }
    }

    fn create_bucket(&self, bucket: &str) -> ClientResult<()> {
        let mut request = self.s3.create_bucket().bucket(bucket);
        // us-east-1 is the default location and rejects an explicit constraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        self.runtime
            .block_on(request.send())
            .map_err(|e| classify("s3", e))?;
        info!("[aws] created bucket {bucket} in {}", self.region);
        Ok(())
    }

    fn configure_static_hosting(
        &self,
        bucket: &str,
        index_document: &str,
        error_document: &str,
    ) -> ClientResult<()> {
        let website = WebsiteConfiguration::builder()
            .index_document(
                IndexDocument::builder()
                    .suffix(index_document)
                    .build()
                    .map_err(|e| build_error("s3", "IndexDocument", e))?,
            )
            .error_document(
                ErrorDocument::builder()
                    .key(error_document)
                    .build()
                    .map_err(|e| build_error("s3", "ErrorDocument", e))?,
            )
            .build();

        self.runtime
            .block_on(
                self.s3
                    .put_bucket_website()
                    .bucket(bucket)
                    .website_configuration(website)
                    .send(),
            )
            .map_err(|e| classify("s3", e))?;

        // New buckets block public policies; website hosting needs anonymous reads.
        self.runtime
            .block_on(self.s3.delete_public_access_block().bucket(bucket).send())
            .map_err(|e| classify("s3", e))?;

        let policy = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "PublicReadForWebsite",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "s3:GetObject",
                "Resource": format!("arn:aws:s3:::{bucket}/*"),
            }]
        });
        self.runtime
            .block_on(
                self.s3
                    .put_bucket_policy()
                    .bucket(bucket)
                    .policy(policy.to_string())
                    .send(),
            )
            .map_err(|e| classify("s3", e))?;
        debug!("[aws] website hosting configured for {bucket}");
        Ok(())
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<()> {
        self.runtime
            .block_on(
                self.s3
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(|e| classify("s3", e))?;
        Ok(())
    }

    fn website_endpoint(&self, bucket: &str) -> String {
        format!("{bucket}.s3-website-{}.amazonaws.com", self.region)
    }
}

impl CertificateAuthority for AwsResourceClient {
    fn list_certificates(
        &self,
        statuses: &[CertificateStatus],
    ) -> ClientResult<Vec<CertificateRecord>> {
        let filters: Vec<AcmStatus> = statuses.iter().filter_map(|s| acm_status(*s)).collect();
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        self.runtime.block_on(async {
            let mut records = Vec::new();
            let mut paginator = self
                .acm
                .list_certificates()
                .set_certificate_statuses(Some(filters))
                .into_paginator()
                .send();
            while let Some(page) = paginator.next().await {
                let page = page.map_err(|e| classify("acm", e))?;
                records.extend(
                    page.certificate_summary_list()
                        .iter()
                        .filter_map(summary_to_record),
                );
            }
            Ok::<_, ClientError>(records)
        })
    }

    fn request_certificate(&self, domain: &str) -> ClientResult<CertificateRecord> {
        // ACM deduplicates requests carrying the same token for an hour.
        let token = Uuid::new_v4().as_simple().to_string();
        let response = self
            .runtime
            .block_on(
                self.acm
                    .request_certificate()
                    .domain_name(domain)
                    .validation_method(ValidationMethod::Dns)
                    .idempotency_token(&token[..32])
                    .send(),
            )
            .map_err(|e| classify("acm", e))?;
        let id = response
            .certificate_arn()
            .ok_or_else(|| ClientError::rejected("acm", "response carried no certificate ARN"))?
            .to_string();
        info!("[aws] requested certificate {id} for {domain}");
        Ok(CertificateRecord {
            id,
            domain: domain.to_string(),
            subject_alternative_names: vec![domain.to_string()],
            status: CertificateStatus::Requested,
            validation_records: Vec::new(),
            created_at: Some(Utc::now()),
            failure_reason: None,
        })
    }

    fn describe_certificate(&self, certificate_id: &str) -> ClientResult<CertificateRecord> {
        let response = self
            .runtime
            .block_on(
                self.acm
                    .describe_certificate()
                    .certificate_arn(certificate_id)
                    .send(),
            )
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|err| err.is_resource_not_found_exception())
                {
                    ClientError::not_found("certificate", certificate_id)
                } else {
                    classify("acm", e)
                }
            })?;
        let detail = response
            .certificate()
            .ok_or_else(|| ClientError::not_found("certificate", certificate_id))?;
        Ok(detail_to_record(certificate_id, detail))
    }
}

impl ContentDelivery for AwsResourceClient {
    fn list_distributions(&self) -> ClientResult<Vec<DistributionRecord>> {
        self.runtime.block_on(async {
            let mut records = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let response = self
                    .cloudfront
                    .list_distributions()
                    .set_marker(marker.clone())
                    .send()
                    .await
                    .map_err(|e| classify("cloudfront", e))?;
                let Some(list) = response.distribution_list() else {
                    break;
                };
                records.extend(list.items().iter().map(summary_to_distribution));
                marker = if list.is_truncated() {
                    list.next_marker().map(str::to_string)
                } else {
                    None
                };
                if marker.is_none() {
                    break;
                }
            }
            Ok::<_, ClientError>(records)
        })
    }

    fn create_distribution(&self, config: &DistributionConfig) -> ClientResult<DistributionRecord> {
        let cf_config = cloudfront_config(config)?;
        let response = self
            .runtime
            .block_on(
                self.cloudfront
                    .create_distribution()
                    .distribution_config(cf_config)
                    .send(),
            )
            .map_err(|e| classify("cloudfront", e))?;
        let distribution = response
            .distribution()
            .ok_or_else(|| ClientError::rejected("cloudfront", "response carried no distribution"))?;
        Ok(distribution_to_record(distribution))
    }

    fn get_distribution(&self, distribution_id: &str) -> ClientResult<DistributionRecord> {
        let response = self
            .runtime
            .block_on(self.cloudfront.get_distribution().id(distribution_id).send())
            .map_err(|e| classify("cloudfront", e))?;
        let distribution = response
            .distribution()
            .ok_or_else(|| ClientError::not_found("distribution", distribution_id))?;
        Ok(distribution_to_record(distribution))
    }

    fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> ClientResult<InvalidationRequest> {
        let batch = InvalidationBatch::builder()
            .paths(
                Paths::builder()
                    .quantity(paths.len() as i32)
                    .set_items(Some(paths.to_vec()))
                    .build()
                    .map_err(|e| build_error("cloudfront", "Paths", e))?,
            )
            .caller_reference(caller_reference)
            .build()
            .map_err(|e| build_error("cloudfront", "InvalidationBatch", e))?;
        let response = self
            .runtime
            .block_on(
                self.cloudfront
                    .create_invalidation()
                    .distribution_id(distribution_id)
                    .invalidation_batch(batch)
                    .send(),
            )
            .map_err(|e| classify("cloudfront", e))?;
        let invalidation = response.invalidation().ok_or_else(|| {
            ClientError::rejected("cloudfront", "response carried no invalidation")
        })?;
        Ok(invalidation_to_request(distribution_id, invalidation))
    }

    fn get_invalidation(
        &self,
        distribution_id: &str,
        invalidation_id: &str,
    ) -> ClientResult<InvalidationRequest> {
        let response = self
            .runtime
            .block_on(
                self.cloudfront
                    .get_invalidation()
                    .distribution_id(distribution_id)
                    .id(invalidation_id)
                    .send(),
            )
            .map_err(|e| classify("cloudfront", e))?;
        let invalidation = response
            .invalidation()
            .ok_or_else(|| ClientError::not_found("invalidation", invalidation_id))?;
        if invalidation.status() != "Completed" {
            warn!("[aws] invalidation {invalidation_id} still {}", invalidation.status());
        }
        Ok(invalidation_to_request(distribution_id, invalidation))
    }
}
