//! Artifact and FileSet domain types.
//!
//! An artifact is one user-attached file (local path or URL), tracked
//! through the ingestion pipeline: Pending → Converting → Uploading →
//! Ready, or Failed at any stage. The FileSet is the ordered collection
//! of all artifacts in a session, with a monotonic version counter that
//! the cache manager keys its rebuilds off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::IngestError;

/// Unique identifier for an artifact, stable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an artifact came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    Path { path: PathBuf },
    Url { url: String },
}

impl ArtifactSource {
    /// Best-effort display name derived from the source.
    pub fn display_name(&self) -> String {
        match self {
            ArtifactSource::Path { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            ArtifactSource::Url { url } => {
                // Link artifacts show a truncated URL, like a browser tab.
                let trimmed: String = url.chars().take(30).collect();
                if url.chars().count() > 30 {
                    format!("link: {trimmed}...")
                } else {
                    format!("link: {trimmed}")
                }
            }
        }
    }
}

/// Coarse media classification driving the conversion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Document,
    Spreadsheet,
    Presentation,
    Image,
    Video,
    Audio,
    Code,
    Config,
}

/// Pipeline status of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Converting,
    Uploading,
    Ready,
    Failed { reason: String },
}

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Ready | ArtifactStatus::Failed { .. })
    }
}

/// A handle to a file the backend has accepted, referenced by URI in
/// turn requests and cache builds instead of resending bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub uri: String,
    pub mime_type: String,
}

/// A small preview image, base64-encoded PNG. Produced by the converter
/// set when it knows how; absent otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub png_base64: String,
}

/// One user-attached file, in original or converted ingestible form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub source: ArtifactSource,
    pub display_name: String,
    pub media_category: MediaCategory,
    /// MIME type of the original artifact.
    pub original_format: String,
    /// MIME type actually sent to the backend. Set once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_format: Option<String>,
    pub byte_size: u64,
    /// Authoritative count from the backend at upload time.
    /// Invariant: `Some` iff `status == Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    /// Invariant: `Some` iff `status == Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteFile>,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a new artifact in `Pending`, before any pipeline work.
    pub fn new(source: ArtifactSource, media_category: MediaCategory, original_format: impl Into<String>) -> Self {
        let display_name = source.display_name();
        Self {
            id: ArtifactId::new(),
            source,
            display_name,
            media_category,
            original_format: original_format.into(),
            ingest_format: None,
            byte_size: 0,
            token_count: None,
            remote: None,
            status: ArtifactStatus::Pending,
            thumbnail: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ArtifactStatus::Ready
    }
}

/// The ordered collection of all artifacts in a session.
///
/// Insertion order is preserved for display; it is irrelevant to cache
/// content identity. The `version` counter increments on every
/// membership change: an artifact reaching `Ready`, an artifact
/// reaching `Failed`, or a removal. Cache builds snapshot this version
/// to detect staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSet {
    artifacts: Vec<Artifact>,
    version: u64,
    max_files: usize,
}

impl FileSet {
    pub fn new(max_files: usize) -> Self {
        Self {
            artifacts: Vec::new(),
            version: 0,
            max_files,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Admit a new artifact, rejecting if the set is at capacity.
    /// Admission does not bump the version: a `Pending` artifact is not
    /// yet cache membership.
    pub fn insert(&mut self, artifact: Artifact) -> std::result::Result<(), IngestError> {
        if self.artifacts.len() >= self.max_files {
            return Err(IngestError::LimitExceeded { max: self.max_files });
        }
        self.artifacts.push(artifact);
        Ok(())
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| &a.id == id)
    }

    pub fn get_mut(&mut self, id: &ArtifactId) -> Option<&mut Artifact> {
        self.artifacts.iter_mut().find(|a| &a.id == id)
    }

    /// Record a non-terminal status transition (Converting, Uploading).
    pub fn set_status(&mut self, id: &ArtifactId, status: ArtifactStatus) {
        debug_assert!(!status.is_terminal(), "terminal transitions go through mark_ready/mark_failed");
        if let Some(a) = self.get_mut(id) {
            a.status = status;
        }
    }

    /// Transition an artifact to `Ready` with its upload results.
    /// Bumps the version: the cache membership changed.
    pub fn mark_ready(&mut self, id: &ArtifactId, remote: RemoteFile, token_count: u64) {
        if let Some(a) = self.get_mut(id) {
            a.ingest_format = Some(remote.mime_type.clone());
            a.remote = Some(remote);
            a.token_count = Some(token_count);
            a.status = ArtifactStatus::Ready;
            self.version += 1;
        }
    }

    /// Transition an artifact to `Failed`. Bumps the version: a failed
    /// attempt changes the declared membership the user expects, so any
    /// previously-consistent cache build is stale.
    pub fn mark_failed(&mut self, id: &ArtifactId, reason: impl Into<String>) {
        if let Some(a) = self.get_mut(id) {
            a.token_count = None;
            a.remote = None;
            a.status = ArtifactStatus::Failed { reason: reason.into() };
            self.version += 1;
        }
    }

    /// Remove an artifact entirely. Bumps the version.
    pub fn remove(&mut self, id: &ArtifactId) -> Option<Artifact> {
        let pos = self.artifacts.iter().position(|a| &a.id == id)?;
        let removed = self.artifacts.remove(pos);
        self.version += 1;
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn ready(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.is_ready())
    }

    /// Remote handles of all `Ready` artifacts, in insertion order.
    pub fn ready_handles(&self) -> Vec<RemoteFile> {
        self.ready().filter_map(|a| a.remote.clone()).collect()
    }

    /// Sum of the `Ready` artifacts' authoritative token counts.
    pub fn ready_tokens(&self) -> u64 {
        self.ready().filter_map(|a| a.token_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> Artifact {
        Artifact::new(
            ArtifactSource::Path { path: PathBuf::from(name) },
            MediaCategory::Document,
            "application/pdf",
        )
    }

    #[test]
    fn new_artifact_is_pending_with_no_remote_state() {
        let a = doc("report.pdf");
        assert_eq!(a.status, ArtifactStatus::Pending);
        assert!(a.token_count.is_none());
        assert!(a.remote.is_none());
        assert_eq!(a.display_name, "report.pdf");
    }

    #[test]
    fn insert_respects_capacity() {
        let mut set = FileSet::new(2);
        set.insert(doc("a.pdf")).unwrap();
        set.insert(doc("b.pdf")).unwrap();
        let err = set.insert(doc("c.pdf")).unwrap_err();
        assert!(matches!(err, IngestError::LimitExceeded { max: 2 }));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn insert_does_not_bump_version() {
        let mut set = FileSet::new(10);
        set.insert(doc("a.pdf")).unwrap();
        assert_eq!(set.version(), 0);
    }

    #[test]
    fn mark_ready_sets_invariant_fields_and_bumps_version() {
        let mut set = FileSet::new(10);
        let a = doc("a.pdf");
        let id = a.id.clone();
        set.insert(a).unwrap();

        let remote = RemoteFile { uri: "files/abc".into(), mime_type: "application/pdf".into() };
        set.mark_ready(&id, remote, 4200);

        let a = set.get(&id).unwrap();
        assert!(a.is_ready());
        assert_eq!(a.token_count, Some(4200));
        assert!(a.remote.is_some());
        assert_eq!(set.version(), 1);
        assert_eq!(set.ready_tokens(), 4200);
    }

    #[test]
    fn mark_failed_clears_remote_state_and_bumps_version() {
        let mut set = FileSet::new(10);
        let a = doc("a.pdf");
        let id = a.id.clone();
        set.insert(a).unwrap();

        set.mark_failed(&id, "conversion blew up");
        let a = set.get(&id).unwrap();
        assert!(matches!(a.status, ArtifactStatus::Failed { .. }));
        assert!(a.token_count.is_none());
        assert_eq!(set.version(), 1);
        assert_eq!(set.ready_tokens(), 0);
    }

    #[test]
    fn remove_bumps_version_and_returns_artifact() {
        let mut set = FileSet::new(10);
        let a = doc("a.pdf");
        let id = a.id.clone();
        set.insert(a).unwrap();

        let removed = set.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(set.is_empty());
        assert_eq!(set.version(), 1);
        assert!(set.remove(&id).is_none());
    }

    #[test]
    fn version_counts_membership_changes() {
        let mut set = FileSet::new(10);
        let a = doc("a.pdf");
        let b = doc("b.pdf");
        let (ida, idb) = (a.id.clone(), b.id.clone());
        set.insert(a).unwrap();
        set.insert(b).unwrap();

        set.mark_ready(&ida, RemoteFile { uri: "files/a".into(), mime_type: "application/pdf".into() }, 10);
        set.mark_failed(&idb, "bad bytes");
        set.remove(&ida);
        assert_eq!(set.version(), 3);
    }

    #[test]
    fn ready_handles_skip_failed_and_pending() {
        let mut set = FileSet::new(10);
        let a = doc("a.pdf");
        let b = doc("b.pdf");
        let c = doc("c.pdf");
        let (ida, idb) = (a.id.clone(), b.id.clone());
        set.insert(a).unwrap();
        set.insert(b).unwrap();
        set.insert(c).unwrap();

        set.mark_ready(&ida, RemoteFile { uri: "files/a".into(), mime_type: "application/pdf".into() }, 10);
        set.mark_failed(&idb, "nope");

        let handles = set.ready_handles();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].uri, "files/a");
    }

    #[test]
    fn url_source_display_name_is_truncated() {
        let src = ArtifactSource::Url {
            url: "https://example.com/very/long/path/to/a/resource/page.html".into(),
        };
        let name = src.display_name();
        assert!(name.starts_with("link: "));
        assert!(name.ends_with("..."));
    }
}
