use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::cloud::ObjectStorage;
use crate::core::types::{OriginRecord, ProvisioningSpec};

use super::error::ProvisionError;
use super::progress::{ProgressEvent, ProgressSink};

/// Files pushed into an origin by [`OriginProvisioner::publish_site`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub files: usize,
    pub bytes: u64,
    pub keys: Vec<String>,
}

pub struct OriginProvisioner<'a, S: ObjectStorage + ?Sized> {
    storage: &'a S,
    progress: &'a dyn ProgressSink,
}

impl<'a, S: ObjectStorage + ?Sized> OriginProvisioner<'a, S> {
    pub fn new(storage: &'a S, progress: &'a dyn ProgressSink) -> Self {
        Self { storage, progress }
    }

    /// Makes sure the bucket exists and serves the site publicly.
    /// Creation only happens when the probe definitely reports no bucket.
    pub fn ensure_origin(
        &self,
        origin_id: &str,
        spec: &ProvisioningSpec,
    ) -> Result<OriginRecord, ProvisionError> {
        let exists = self
            .storage
            .bucket_exists(origin_id)
            .map_err(|err| ProvisionError::remote("bucket_exists", err))?;

        if exists {
            info!("[origin] bucket {} already exists", origin_id);
            self.progress.emit(&ProgressEvent::OriginReused {
                origin_id: origin_id.to_string(),
            });
        } else {
            info!("[origin] creating bucket {}", origin_id);
            self.storage
                .create_bucket(origin_id)
                .map_err(|err| ProvisionError::remote("create_bucket", err))?;
            self.progress.emit(&ProgressEvent::OriginCreated {
                origin_id: origin_id.to_string(),
            });
        }

        self.storage
            .configure_static_hosting(origin_id, &spec.index_document, &spec.error_document)
            .map_err(|err| ProvisionError::remote("configure_static_hosting", err))?;
        let website_endpoint = self.storage.website_endpoint(origin_id);
        info!("[origin] {} serving at {}", origin_id, website_endpoint);
        self.progress.emit(&ProgressEvent::HostingConfigured {
            origin_id: origin_id.to_string(),
            endpoint: website_endpoint.clone(),
        });

        Ok(OriginRecord {
            id: origin_id.to_string(),
            website_endpoint,
            public_hosting: true,
            index_document: spec.index_document.clone(),
            error_document: spec.error_document.clone(),
            created: !exists,
        })
    }

    /// Uploads every file under `site_dir`, keyed by its `/`-separated relative path.
    pub fn publish_site(
        &self,
        origin_id: &str,
        site_dir: &Path,
    ) -> Result<UploadSummary, ProvisionError> {
        let files = collect_files(site_dir)?;
        if files.is_empty() {
            warn!("[origin] {} contains no files to publish", site_dir.display());
        }

        let mut summary = UploadSummary::default();
        for path in files {
            let key = object_key(site_dir, &path);
            let body = fs::read(&path).map_err(|source| site_error(&path, source))?;
            let content_type = content_type_for(&path);
            debug!("[origin] uploading {} ({}, {} bytes)", key, content_type, body.len());

            summary.bytes += body.len() as u64;
            self.storage
                .put_object(origin_id, &key, body, &content_type)
                .map_err(|err| ProvisionError::remote("put_object", err))?;
            summary.files += 1;
            summary.keys.push(key);
        }

        info!(
            "[origin] published {} file(s), {} bytes to {}",
            summary.files, summary.bytes, origin_id
        );
        self.progress.emit(&ProgressEvent::ContentPublished {
            origin_id: origin_id.to_string(),
            files: summary.files,
            bytes: summary.bytes,
        });
        Ok(summary)
    }
}

fn site_error(path: &Path, source: std::io::Error) -> ProvisionError {
    ProvisionError::SiteContent {
        path: path.display().to_string(),
        source,
    }
}

/// Regular files below `root`, including symlinked ones, sorted so uploads
/// are deterministic.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| site_error(&dir, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| site_error(&dir, source))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| site_error(&path, source))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink() {
                // Linked files are uploaded; linked directories are not descended.
                let target = fs::metadata(&path).map_err(|source| site_error(&path, source))?;
                if target.is_file() {
                    files.push(path);
                } else {
                    warn!("[origin] skipping linked directory {}", path.display());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

fn object_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
