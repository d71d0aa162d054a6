//! In-process control plane.
//!
//! Records every call and serves scripted certificate, distribution and
//! invalidation lifecycles so orchestration code can be exercised
//! deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use log::debug;
use uuid::Uuid;

use super::{
    CertificateAuthority, ClientError, ClientResult, ContentDelivery, ObjectStorage,
};
use crate::core::types::{
    CertificateRecord, CertificateStatus, DistributionConfig, DistributionRecord,
    DistributionStatus, InvalidationRequest, InvalidationStatus, ValidationRecord,
    ValidationStatus,
};
use crate::domain::same_domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    BucketExists,
    CreateBucket,
    ConfigureStaticHosting,
    PutObject,
    ListCertificates,
    RequestCertificate,
    DescribeCertificate,
    ListDistributions,
    CreateDistribution,
    GetDistribution,
    CreateInvalidation,
    GetInvalidation,
}

/// How a certificate evolves as it is described. Counts are describe calls
/// after the request; `Some(0)` applies at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateScript {
    pub records_after: u32,
    pub emits_records: bool,
    pub issue_after: Option<u32>,
    pub fail_after: Option<u32>,
}

impl Default for CertificateScript {
    fn default() -> Self {
        Self {
            records_after: 1,
            emits_records: true,
            issue_after: Some(2),
            fail_after: None,
        }
    }
}

impl CertificateScript {
    /// Issued on request without any validation records.
    pub fn issued_immediately() -> Self {
        Self {
            records_after: 0,
            emits_records: false,
            issue_after: Some(0),
            fail_after: None,
        }
    }

    pub fn issued_after(describes: u32) -> Self {
        Self {
            records_after: 0,
            issue_after: Some(describes),
            ..Self::default()
        }
    }

    pub fn failed_after(describes: u32) -> Self {
        Self {
            records_after: 0,
            issue_after: None,
            fail_after: Some(describes),
            ..Self::default()
        }
    }

    /// Validation records appear but the DNS change never lands.
    pub fn pending_forever() -> Self {
        Self {
            records_after: 0,
            issue_after: None,
            ..Self::default()
        }
    }

    /// Validation records never appear.
    pub fn records_never_appear() -> Self {
        Self {
            records_after: 0,
            emits_records: false,
            issue_after: None,
            fail_after: None,
        }
    }
}

struct FakeCertificate {
    record: CertificateRecord,
    script: CertificateScript,
    describes: u32,
}

impl FakeCertificate {
    fn evolve(&mut self, at_request: bool) {
        if self.record.status.is_terminal() {
            return;
        }
        if !at_request {
            self.describes += 1;
        }
        let n = self.describes;

        if self.script.emits_records
            && n >= self.script.records_after
            && self.record.validation_records.is_empty()
        {
            self.record.validation_records = self
                .record
                .validated_domains()
                .iter()
                .map(|domain| fake_validation_record(domain))
                .collect();
        }

        if let Some(limit) = self.script.fail_after
            && n >= limit
        {
            self.record.status = CertificateStatus::Failed;
            self.record.failure_reason = Some("validation record not found in DNS".to_string());
            self.set_record_status(ValidationStatus::Failed);
        } else if let Some(limit) = self.script.issue_after
            && n >= limit
        {
            self.record.status = CertificateStatus::Issued;
            self.set_record_status(ValidationStatus::Success);
        } else if self.record.status == CertificateStatus::Requested {
            self.record.status = CertificateStatus::PendingValidation;
        }
    }

    fn set_record_status(&mut self, status: ValidationStatus) {
        for record in &mut self.record.validation_records {
            record.status = status;
        }
    }
}

fn fake_validation_record(domain: &str) -> ValidationRecord {
    let token = Uuid::new_v4().as_simple().to_string();
    ValidationRecord {
        domain: domain.to_string(),
        record_type: "CNAME".to_string(),
        name: format!("_{}.{}.", &token[..16], domain),
        value: format!("_{}.acm-validations.test.", &token[16..]),
        status: ValidationStatus::PendingValidation,
    }
}

#[derive(Default)]
struct Bucket {
    website: Option<(String, String)>,
    objects: BTreeMap<String, (Vec<u8>, String)>,
}

struct FakeDistribution {
    record: DistributionRecord,
    config: Option<DistributionConfig>,
    remaining_in_progress: u32,
}

struct FakeInvalidation {
    request: InvalidationRequest,
    remaining_pending: u32,
}

#[derive(Default)]
struct CloudState {
    buckets: BTreeMap<String, Bucket>,
    certificates: Vec<FakeCertificate>,
    distributions: Vec<FakeDistribution>,
    invalidations: Vec<FakeInvalidation>,
    calls: HashMap<Operation, u32>,
    injected: HashMap<Operation, VecDeque<ClientError>>,
    next_script: CertificateScript,
    deploy_after: u32,
    invalidation_complete_after: u32,
    sequence: i64,
}

/// Thread-safe fake of the storage, certificate and CDN control planes.
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
    epoch: DateTime<Utc>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            epoch: Utc::now(),
        }
    }

    /// Script applied to certificates requested from now on.
    pub fn with_certificate_script(self, script: CertificateScript) -> Self {
        self.lock().next_script = script;
        self
    }

    /// Number of `get_distribution` calls a new distribution stays InProgress.
    pub fn with_deploy_after(self, gets: u32) -> Self {
        self.lock().deploy_after = gets;
        self
    }

    pub fn with_invalidation_complete_after(self, gets: u32) -> Self {
        self.lock().invalidation_complete_after = gets;
        self
    }

    pub fn seed_bucket(&self, bucket: &str) {
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    pub fn seed_certificate(&self, record: CertificateRecord, script: CertificateScript) {
        self.lock().certificates.push(FakeCertificate {
            record,
            script,
            describes: 0,
        });
    }

    pub fn seed_distribution(&self, record: DistributionRecord) {
        self.lock().distributions.push(FakeDistribution {
            record,
            config: None,
            remaining_in_progress: 0,
        });
    }

    /// Makes the next call of `operation` fail with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, operation: Operation, error: ClientError) {
        self.lock()
            .injected
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, operation: Operation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn website(&self, bucket: &str) -> Option<(String, String)> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.website.clone())
    }

    /// Stored body and content type of an object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    pub fn certificates(&self) -> Vec<CertificateRecord> {
        self.lock()
            .certificates
            .iter()
            .map(|c| c.record.clone())
            .collect()
    }

    pub fn distributions(&self) -> Vec<DistributionRecord> {
        self.lock()
            .distributions
            .iter()
            .map(|d| d.record.clone())
            .collect()
    }

    /// Configuration a distribution was created with; `None` for seeded ones.
    pub fn distribution_config(&self, distribution_id: &str) -> Option<DistributionConfig> {
        self.lock()
            .distributions
            .iter()
            .find(|d| d.record.id == distribution_id)
            .and_then(|d| d.config.clone())
    }

    pub fn invalidations(&self) -> Vec<InvalidationRequest> {
        self.lock()
            .invalidations
            .iter()
            .map(|i| i.request.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts the call and returns an injected failure, if one is queued.
    fn enter(&self, operation: Operation) -> ClientResult<MutexGuard<'_, CloudState>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        debug!("[memory] {:?}", operation);
        if let Some(err) = state
            .injected
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        Ok(state)
    }

    fn tick(&self, state: &mut CloudState) -> DateTime<Utc> {
        state.sequence += 1;
        self.epoch + Duration::seconds(state.sequence)
    }
}

impl ObjectStorage for InMemoryCloud {
    fn bucket_exists(&self, bucket: &str) -> ClientResult<bool> {
        let state = self.enter(Operation::BucketExists)?;
        Ok(state.buckets.contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> ClientResult<()> {
        let mut state = self.enter(Operation::CreateBucket)?;
        if state.buckets.contains_key(bucket) {
            return Err(ClientError::rejected("storage", "BucketAlreadyOwnedByYou"));
        }
        state.buckets.insert(bucket.to_string(), Bucket::default());
        Ok(())
    }

    fn configure_static_hosting(
        &self,
        bucket: &str,
        index_document: &str,
        error_document: &str,
    ) -> ClientResult<()> {
        let mut state = self.enter(Operation::ConfigureStaticHosting)?;
        let bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ClientError::not_found("bucket", bucket))?;
        bucket.website = Some((index_document.to_string(), error_document.to_string()));
        Ok(())
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<()> {
        let mut state = self.enter(Operation::PutObject)?;
        let bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ClientError::not_found("bucket", bucket))?;
        bucket
            .objects
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    fn website_endpoint(&self, bucket: &str) -> String {
        format!("{bucket}.website.storage.test")
    }
}

impl CertificateAuthority for InMemoryCloud {
    fn list_certificates(
        &self,
        statuses: &[CertificateStatus],
    ) -> ClientResult<Vec<CertificateRecord>> {
        let state = self.enter(Operation::ListCertificates)?;
        Ok(state
            .certificates
            .iter()
            .filter(|c| statuses.contains(&c.record.status))
            .map(|c| c.record.clone())
            .collect())
    }

    fn request_certificate(&self, domain: &str) -> ClientResult<CertificateRecord> {
        let mut state = self.enter(Operation::RequestCertificate)?;
        let created_at = self.tick(&mut state);
        let mut certificate = FakeCertificate {
            record: CertificateRecord {
                id: format!("arn:fake:acm::certificate/{}", Uuid::new_v4()),
                domain: domain.to_string(),
                subject_alternative_names: vec![domain.to_string()],
                status: CertificateStatus::Requested,
                validation_records: Vec::new(),
                created_at: Some(created_at),
                failure_reason: None,
            },
            script: state.next_script.clone(),
            describes: 0,
        };
        certificate.evolve(true);
        let record = certificate.record.clone();
        state.certificates.push(certificate);
        Ok(record)
    }

    fn describe_certificate(&self, certificate_id: &str) -> ClientResult<CertificateRecord> {
        let mut state = self.enter(Operation::DescribeCertificate)?;
        let certificate = state
            .certificates
            .iter_mut()
            .find(|c| c.record.id == certificate_id)
            .ok_or_else(|| ClientError::not_found("certificate", certificate_id))?;
        certificate.evolve(false);
        Ok(certificate.record.clone())
    }
}

impl ContentDelivery for InMemoryCloud {
    fn list_distributions(&self) -> ClientResult<Vec<DistributionRecord>> {
        let state = self.enter(Operation::ListDistributions)?;
        Ok(state
            .distributions
            .iter()
            .map(|d| d.record.clone())
            .collect())
    }

    fn create_distribution(&self, config: &DistributionConfig) -> ClientResult<DistributionRecord> {
        let mut state = self.enter(Operation::CreateDistribution)?;
        let taken = state.distributions.iter().any(|d| {
            d.record
                .aliases
                .iter()
                .any(|alias| config.aliases.iter().any(|a| same_domain(a, alias)))
        });
        if taken {
            return Err(ClientError::rejected("cdn", "CNAMEAlreadyExists"));
        }

        let deploy_after = state.deploy_after;
        let id = format!("E{}", &Uuid::new_v4().as_simple().to_string()[..13]).to_uppercase();
        let record = DistributionRecord {
            domain_name: format!("{}.cdn.test", id.to_lowercase()),
            id,
            aliases: config.aliases.clone(),
            certificate_id: Some(config.viewer_certificate.certificate_id.clone()),
            origin_domain: Some(config.origin.domain_name.clone()),
            status: if deploy_after == 0 {
                DistributionStatus::Deployed
            } else {
                DistributionStatus::InProgress
            },
        };
        state.distributions.push(FakeDistribution {
            record: record.clone(),
            config: Some(config.clone()),
            remaining_in_progress: deploy_after,
        });
        Ok(record)
    }

    fn get_distribution(&self, distribution_id: &str) -> ClientResult<DistributionRecord> {
        let mut state = self.enter(Operation::GetDistribution)?;
        let distribution = state
            .distributions
            .iter_mut()
            .find(|d| d.record.id == distribution_id)
            .ok_or_else(|| ClientError::not_found("distribution", distribution_id))?;
        if distribution.record.status == DistributionStatus::InProgress {
            distribution.remaining_in_progress = distribution.remaining_in_progress.saturating_sub(1);
            if distribution.remaining_in_progress == 0 {
                distribution.record.status = DistributionStatus::Deployed;
            }
        }
        Ok(distribution.record.clone())
    }

    fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> ClientResult<InvalidationRequest> {
        let mut state = self.enter(Operation::CreateInvalidation)?;
        if !state
            .distributions
            .iter()
            .any(|d| d.record.id == distribution_id)
        {
            return Err(ClientError::not_found("distribution", distribution_id));
        }
        if let Some(existing) = state.invalidations.iter().find(|i| {
            i.request.distribution_id == distribution_id
                && i.request.caller_reference == caller_reference
        }) {
            if existing.request.paths != paths {
                return Err(ClientError::rejected("cdn", "InvalidationBatchAlreadyExists"));
            }
            return Ok(existing.request.clone());
        }

        let created_at = self.tick(&mut state);
        let remaining = state.invalidation_complete_after;
        let request = InvalidationRequest {
            id: format!("I{}", &Uuid::new_v4().as_simple().to_string()[..13]).to_uppercase(),
            distribution_id: distribution_id.to_string(),
            paths: paths.to_vec(),
            caller_reference: caller_reference.to_string(),
            status: if remaining == 0 {
                InvalidationStatus::Completed
            } else {
                InvalidationStatus::Pending
            },
            created_at: Some(created_at),
        };
        state.invalidations.push(FakeInvalidation {
            request: request.clone(),
            remaining_pending: remaining,
        });
        Ok(request)
    }

    fn get_invalidation(
        &self,
        distribution_id: &str,
        invalidation_id: &str,
    ) -> ClientResult<InvalidationRequest> {
        let mut state = self.enter(Operation::GetInvalidation)?;
        let invalidation = state
            .invalidations
            .iter_mut()
            .find(|i| {
                i.request.distribution_id == distribution_id && i.request.id == invalidation_id
            })
            .ok_or_else(|| ClientError::not_found("invalidation", invalidation_id))?;
        if invalidation.request.status == InvalidationStatus::Pending {
            invalidation.remaining_pending = invalidation.remaining_pending.saturating_sub(1);
            if invalidation.remaining_pending == 0 {
                invalidation.request.status = InvalidationStatus::Completed;
            }
        }
        Ok(invalidation.request.clone())
    }
}
