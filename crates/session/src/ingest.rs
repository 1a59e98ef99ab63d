//! File ingestion pipeline.
//!
//! Each attached artifact moves through Pending → Converting →
//! Uploading → Ready on its own spawned task, gated by a semaphore so
//! at most `parallelism` artifacts are in flight. Failures are isolated
//! to the artifact they occur on; siblings keep processing. Every
//! terminal transition (Ready, Failed, removal) invalidates the context
//! cache after the file-set lock is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use docshelf_config::AppConfig;
use docshelf_convert::{detect, Fetched, UrlFetcher};
use docshelf_core::artifact::{Artifact, ArtifactId, ArtifactSource, ArtifactStatus, FileSet};
use docshelf_core::error::{BackendError, IngestError};
use docshelf_core::validate::{sanitize_filename, validate_extension, validate_file_size, validate_url};
use docshelf_core::{Backend, ConverterSet, CountRequest};

use crate::cache::CacheManager;

/// Tunables for the pipeline, lifted out of the application config.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_file_bytes: u64,
    pub parallelism: usize,
    pub upload_retry_limit: u32,
    pub upload_backoff_base: Duration,
    pub upload_backoff_cap: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            parallelism: config.ingest.parallelism,
            upload_retry_limit: config.ingest.upload_retry_limit,
            upload_backoff_base: Duration::from_millis(config.ingest.upload_backoff_base_ms),
            upload_backoff_cap: Duration::from_millis(config.ingest.upload_backoff_cap_ms),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 100 * 1024 * 1024,
            parallelism: 4,
            upload_retry_limit: 3,
            upload_backoff_base: Duration::from_millis(500),
            upload_backoff_cap: Duration::from_secs(8),
        }
    }
}

/// Drives attached artifacts from Pending to a terminal state.
pub struct IngestionPipeline {
    backend: Arc<dyn Backend>,
    converters: Arc<dyn ConverterSet>,
    files: Arc<RwLock<FileSet>>,
    cache: Arc<CacheManager>,
    fetcher: UrlFetcher,
    options: PipelineOptions,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<ArtifactId, JoinHandle<()>>>,
}

impl IngestionPipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        converters: Arc<dyn ConverterSet>,
        files: Arc<RwLock<FileSet>>,
        cache: Arc<CacheManager>,
        options: PipelineOptions,
    ) -> std::result::Result<Self, IngestError> {
        let fetcher = UrlFetcher::new().map_err(|e| IngestError::Io(e.to_string()))?;
        let permits = Arc::new(Semaphore::new(options.parallelism.max(1)));
        Ok(Self {
            backend,
            converters,
            files,
            cache,
            fetcher,
            options,
            permits,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a local file. Validation that can fail fast (extension,
    /// capacity) happens synchronously; the rest runs on a spawned task.
    pub async fn attach_path(self: &Arc<Self>, path: PathBuf) -> std::result::Result<ArtifactId, IngestError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        validate_extension(&file_name)?;

        let detected = detect(&file_name);
        let artifact = Artifact::new(
            ArtifactSource::Path { path },
            detected.category,
            detected.mime_type,
        );
        self.admit_and_spawn(artifact).await
    }

    /// Attach a URL. The fetch decides later whether it is a direct
    /// file download or a page to scrape.
    pub async fn attach_url(self: &Arc<Self>, url: &str) -> std::result::Result<ArtifactId, IngestError> {
        let url = validate_url(url)?;
        let artifact = Artifact::new(
            ArtifactSource::Url { url },
            docshelf_core::MediaCategory::Document,
            "application/octet-stream",
        );
        self.admit_and_spawn(artifact).await
    }

    async fn admit_and_spawn(self: &Arc<Self>, artifact: Artifact) -> std::result::Result<ArtifactId, IngestError> {
        let id = artifact.id.clone();
        let name = artifact.display_name.clone();
        {
            let mut files = self.files.write().await;
            files.insert(artifact)?;
        }
        info!(artifact = %id, name = %name, "Artifact attached");

        let this = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            this.run(task_id).await;
        });
        self.tasks.lock().await.insert(id.clone(), handle);
        Ok(id)
    }

    /// Remove an artifact, aborting its pipeline task if still running.
    pub async fn remove(&self, id: &ArtifactId) -> std::result::Result<Artifact, IngestError> {
        if let Some(handle) = self.tasks.lock().await.remove(id) {
            handle.abort();
        }
        let removed = {
            let mut files = self.files.write().await;
            files.remove(id)
        };
        match removed {
            Some(artifact) => {
                info!(artifact = %id, name = %artifact.display_name, "Artifact removed");
                self.cache.invalidate().await;
                Ok(artifact)
            }
            None => Err(IngestError::UnknownArtifact(id.to_string())),
        }
    }

    /// Current pipeline status of one artifact.
    pub async fn status(&self, id: &ArtifactId) -> Option<ArtifactStatus> {
        self.files.read().await.get(id).map(|a| a.status.clone())
    }

    async fn run(self: Arc<Self>, id: ArtifactId) {
        let result = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(_permit) => self.process(&id).await,
            Err(_) => Err(IngestError::Cancelled),
        };

        if let Err(e) = result {
            warn!(artifact = %id, error = %e, "Artifact ingestion failed");
            {
                let mut files = self.files.write().await;
                files.mark_failed(&id, e.to_string());
            }
            self.cache.invalidate().await;
        }
        self.tasks.lock().await.remove(&id);
    }

    async fn process(&self, id: &ArtifactId) -> std::result::Result<(), IngestError> {
        let (source, name) = {
            let files = self.files.read().await;
            let artifact = files
                .get(id)
                .ok_or_else(|| IngestError::UnknownArtifact(id.to_string()))?;
            (artifact.source.clone(), artifact.display_name.clone())
        };

        {
            let mut files = self.files.write().await;
            files.set_status(id, ArtifactStatus::Converting);
        }

        let (bytes, mime_type) = self.load(id, &source, &name).await?;
        validate_file_size(bytes.len() as u64, self.options.max_file_bytes)?;

        let (bytes, ingest_format) = if self.converters.needs_conversion(&mime_type) {
            debug!(artifact = %id, from = %mime_type, "Converting artifact");
            let converted = self
                .converters
                .convert(&bytes, &mime_type)
                .await
                .map_err(|e| IngestError::Conversion { name: name.clone(), reason: e.to_string() })?;
            (converted.bytes, converted.ingest_format)
        } else {
            (bytes, mime_type.clone())
        };

        let thumbnail = self.converters.thumbnail(&bytes, &ingest_format);
        {
            let mut files = self.files.write().await;
            files.set_status(id, ArtifactStatus::Uploading);
            if let Some(artifact) = files.get_mut(id) {
                artifact.byte_size = bytes.len() as u64;
                artifact.ingest_format = Some(ingest_format.clone());
                artifact.thumbnail = thumbnail;
            }
        }

        let remote = self.upload_with_retry(bytes, &ingest_format, &name).await?;
        let token_count = self
            .backend
            .count_tokens(CountRequest::for_file(remote.clone()))
            .await
            .map_err(|e| IngestError::Upload { name: name.clone(), reason: e.to_string() })?;

        {
            let mut files = self.files.write().await;
            files.mark_ready(id, remote, token_count);
        }
        self.cache.invalidate().await;
        info!(artifact = %id, name = %name, tokens = token_count, "Artifact ready");
        Ok(())
    }

    /// Produce raw bytes and their MIME type from the artifact source.
    async fn load(
        &self,
        id: &ArtifactId,
        source: &ArtifactSource,
        name: &str,
    ) -> std::result::Result<(Vec<u8>, String), IngestError> {
        match source {
            ArtifactSource::Path { path } => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| IngestError::Io(e.to_string()))?;
                let mime = detect(name).mime_type;
                Ok((bytes, mime))
            }
            ArtifactSource::Url { url } => {
                let fetched = self
                    .fetcher
                    .fetch(url)
                    .await
                    .map_err(|e| IngestError::Conversion { name: name.to_string(), reason: e.to_string() })?;
                match fetched {
                    Fetched::File { bytes, file_name, mime_type } => {
                        validate_extension(&file_name)?;
                        let safe_name = sanitize_filename(&file_name);
                        let mut files = self.files.write().await;
                        if let Some(artifact) = files.get_mut(id) {
                            artifact.display_name = safe_name;
                            artifact.original_format = mime_type.clone();
                            artifact.media_category =
                                docshelf_convert::category_for_mime(&mime_type);
                        }
                        Ok((bytes, mime_type))
                    }
                    Fetched::Page { bytes, mime_type } => {
                        let mut files = self.files.write().await;
                        if let Some(artifact) = files.get_mut(id) {
                            artifact.original_format = mime_type.clone();
                        }
                        Ok((bytes, mime_type))
                    }
                }
            }
        }
    }

    /// Upload with capped exponential backoff on transient failures.
    async fn upload_with_retry(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        name: &str,
    ) -> std::result::Result<docshelf_core::RemoteFile, IngestError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .backend
                .upload(bytes.clone(), mime_type, name)
                .await
            {
                Ok(remote) => return Ok(remote),
                Err(e) if is_transient(&e) && attempt < self.options.upload_retry_limit => {
                    let delay = self.backoff_delay(attempt, &e);
                    warn!(
                        name = %name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(IngestError::Upload { name: name.to_string(), reason: e.to_string() });
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32, error: &BackendError) -> Duration {
        let exp = self
            .options
            .upload_backoff_base
            .saturating_mul(1u32 << attempt.min(16));
        let delay = exp.min(self.options.upload_backoff_cap);
        match error {
            // The backend's own retry hint wins when it is longer.
            BackendError::RateLimited { retry_after_secs } => {
                delay.max(Duration::from_secs(*retry_after_secs))
            }
            _ => delay,
        }
    }
}

/// Transient failures worth retrying: rate limits, network flakes,
/// timeouts, and server-side errors. Client errors are permanent.
fn is_transient(error: &BackendError) -> bool {
    match error {
        BackendError::RateLimited { .. }
        | BackendError::Network(_)
        | BackendError::Timeout(_) => true,
        BackendError::ApiError { status_code, .. } => *status_code >= 500,
        _ => false,
    }
}
