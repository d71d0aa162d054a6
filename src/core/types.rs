use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::normalize_domain;

/// HTTP methods a distribution may accept from viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Put,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods a static site distribution is allowed to serve.
    pub fn is_read_only(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching behaviour requested for the default cache behaviour of the distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub min_ttl: u64,
    pub forward_query_string: bool,
    pub forward_cookies: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            min_ttl: 0,
            forward_query_string: false,
            forward_cookies: false,
        }
    }
}

/// Immutable description of the site to converge. Built once per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSpec {
    /// Normalized hostname the site is served on (also the distribution alias).
    pub domain: String,
    /// Storage bucket backing the site; defaults to the domain.
    pub origin_id: String,
    pub index_document: String,
    pub error_document: String,
    pub default_root_object: String,
    pub cache_policy: CachePolicy,
    pub allowed_methods: Vec<HttpMethod>,
    /// Local build directory published into the origin, if any.
    pub site_dir: Option<PathBuf>,
}

impl ProvisioningSpec {
    pub fn new(domain: &str) -> anyhow::Result<Self> {
        let domain = normalize_domain(domain)?;
        Ok(Self {
            origin_id: domain.clone(),
            domain,
            index_document: "index.html".to_string(),
            error_document: "index.html".to_string(),
            default_root_object: "index.html".to_string(),
            cache_policy: CachePolicy::default(),
            allowed_methods: vec![HttpMethod::Get, HttpMethod::Head],
            site_dir: None,
        })
    }

    pub fn with_origin_id(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = origin_id.into();
        self
    }

    pub fn with_documents(mut self, index: impl Into<String>, error: impl Into<String>) -> Self {
        self.index_document = index.into();
        self.error_document = error.into();
        self
    }

    pub fn with_site_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.site_dir = Some(dir.into());
        self
    }

    pub fn with_allowed_methods(mut self, methods: Vec<HttpMethod>) -> Self {
        self.allowed_methods = methods;
        self
    }

    /// Checks the invariants the provisioners rely on.
    pub fn validate(&self) -> Result<(), String> {
        if self.origin_id.trim().is_empty() {
            return Err("origin identifier is required".to_string());
        }
        if self.index_document.trim().is_empty() || self.error_document.trim().is_empty() {
            return Err("index and error document names are required".to_string());
        }
        if self.allowed_methods.is_empty() {
            return Err("at least one allowed method is required".to_string());
        }
        if let Some(method) = self.allowed_methods.iter().find(|m| !m.is_read_only()) {
            return Err(format!(
                "method {method} is not allowed; static sites accept GET and HEAD only"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Requested,
    PendingValidation,
    Issued,
    Failed,
}

impl CertificateStatus {
    /// Statuses that block a new request for the same domain.
    pub const REUSABLE: [CertificateStatus; 3] = [
        CertificateStatus::Requested,
        CertificateStatus::PendingValidation,
        CertificateStatus::Issued,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, CertificateStatus::Issued | CertificateStatus::Failed)
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CertificateStatus::Requested => "REQUESTED",
            CertificateStatus::PendingValidation => "PENDING_VALIDATION",
            CertificateStatus::Issued => "ISSUED",
            CertificateStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    PendingValidation,
    Success,
    Failed,
}

/// DNS record the certificate authority expects before issuing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Domain on the certificate this record proves.
    pub domain: String,
    pub record_type: String,
    pub name: String,
    pub value: String,
    pub status: ValidationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: String,
    pub domain: String,
    /// Every domain on the certificate, primary first.
    pub subject_alternative_names: Vec<String>,
    pub status: CertificateStatus,
    pub validation_records: Vec<ValidationRecord>,
    pub created_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl CertificateRecord {
    /// Domains that need a validation record; never empty.
    pub fn validated_domains(&self) -> Vec<String> {
        if self.subject_alternative_names.is_empty() {
            vec![self.domain.clone()]
        } else {
            self.subject_alternative_names.clone()
        }
    }

    pub fn covers(&self, domain: &str) -> bool {
        crate::domain::same_domain(&self.domain, domain)
            || crate::domain::contains_domain(&self.subject_alternative_names, domain)
    }

    /// True once the authority has published a record for every domain.
    pub fn has_all_validation_records(&self) -> bool {
        self.validated_domains().iter().all(|domain| {
            self.validation_records
                .iter()
                .any(|record| crate::domain::same_domain(&record.domain, domain))
        })
    }
}

/// Storage bucket serving the site files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginRecord {
    pub id: String,
    /// Public website hostname used as the distribution's origin.
    pub website_endpoint: String,
    pub public_hosting: bool,
    pub index_document: String,
    pub error_document: String,
    /// Whether this run created the bucket.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    InProgress,
    Deployed,
    Disabled,
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DistributionStatus::InProgress => "InProgress",
            DistributionStatus::Deployed => "Deployed",
            DistributionStatus::Disabled => "Disabled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub id: String,
    /// Hostname assigned by the CDN provider; the target of the final CNAME.
    pub domain_name: String,
    pub aliases: Vec<String>,
    pub certificate_id: Option<String>,
    pub origin_domain: Option<String>,
    pub status: DistributionStatus,
}

impl DistributionRecord {
    pub fn serves(&self, domain: &str) -> bool {
        crate::domain::contains_domain(&self.aliases, domain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginProtocolPolicy {
    HttpOnly,
    MatchViewer,
    HttpsOnly,
}

impl OriginProtocolPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginProtocolPolicy::HttpOnly => "http-only",
            OriginProtocolPolicy::MatchViewer => "match-viewer",
            OriginProtocolPolicy::HttpsOnly => "https-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    AllowAll,
    RedirectToHttps,
    HttpsOnly,
}

impl ViewerProtocolPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewerProtocolPolicy::AllowAll => "allow-all",
            ViewerProtocolPolicy::RedirectToHttps => "redirect-to-https",
            ViewerProtocolPolicy::HttpsOnly => "https-only",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    pub id: String,
    pub domain_name: String,
    pub http_port: u16,
    pub https_port: u16,
    pub protocol_policy: OriginProtocolPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheBehaviorConfig {
    pub target_origin_id: String,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub allowed_methods: Vec<HttpMethod>,
    pub cached_methods: Vec<HttpMethod>,
    pub forward_query_string: bool,
    pub forward_cookies: bool,
    pub min_ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerCertificateConfig {
    pub certificate_id: String,
    /// Always `sni-only`; dedicated-IP delivery is never requested.
    pub ssl_support_method: String,
    pub minimum_protocol_version: String,
}

/// Desired configuration handed to the CDN on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub caller_reference: String,
    pub comment: String,
    pub aliases: Vec<String>,
    pub default_root_object: String,
    pub origin: OriginConfig,
    pub default_cache_behavior: CacheBehaviorConfig,
    pub viewer_certificate: ViewerCertificateConfig,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub id: String,
    pub distribution_id: String,
    pub paths: Vec<String>,
    /// Caller-supplied uniqueness token; a repeated token is a retry, not a new batch.
    pub caller_reference: String,
    pub status: InvalidationStatus,
    pub created_at: Option<DateTime<Utc>>,
}

/// Manual DNS change the operator has to make at the registrar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsInstruction {
    pub purpose: DnsPurpose,
    pub record_type: String,
    /// Fully qualified record name.
    pub name: String,
    /// Name relative to the zone, as most registrar panels expect it.
    pub relative_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsPurpose {
    CertificateValidation,
    SiteAlias,
}
