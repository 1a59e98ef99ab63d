//! Context cache lifecycle management.
//!
//! One remote cache object holds the content of all `Ready` artifacts.
//! The manager rebuilds it when the file-set membership changes or the
//! TTL elapses, under two mandatory rules:
//!
//! - **Single flight**: at most one build is in flight; concurrent
//!   callers share its result instead of racing their own builds.
//! - **Subsumed build**: a build whose file-set snapshot is stale by
//!   the time the remote object is confirmed is discarded and marked
//!   `Invalid`, never served.
//!
//! Builds run on their own spawned task and report through a broadcast
//! channel, so a caller that is cancelled mid-wait never strands the
//! flight. Expiry is checked lazily at request time; there is no
//! background timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use docshelf_core::artifact::FileSet;
use docshelf_core::backend::CacheHandle;
use docshelf_core::error::BackendError;
use docshelf_core::{Backend, RemoteFile};

/// Cache lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// No ready artifacts; nothing to cache.
    Empty,
    /// A build is in flight.
    Building,
    /// `handle` serves the membership at `built_version`.
    Ready,
    /// TTL elapsed; next request rebuilds.
    Expired,
    /// Membership changed or a build failed; next request rebuilds.
    Invalid,
}

/// What a finished build attempt reported to its waiters.
#[derive(Debug, Clone)]
enum BuildOutcome {
    Built,
    Subsumed,
    Failed(BackendError),
}

struct CacheInner {
    state: CacheState,
    handle: Option<CacheHandle>,
    built_version: u64,
    built_at: Option<Instant>,
    last_error: Option<String>,
    /// Present exactly while a build is in flight. Waiters subscribe
    /// and re-evaluate once the build task broadcasts its outcome.
    build_done: Option<broadcast::Sender<BuildOutcome>>,
}

/// Owns the lifecycle of the session's single remote context cache.
pub struct CacheManager {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn Backend>,
    files: Arc<RwLock<FileSet>>,
    model: String,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl CacheManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        files: Arc<RwLock<FileSet>>,
        model: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                files,
                model: model.into(),
                ttl,
                inner: Mutex::new(CacheInner {
                    state: CacheState::Empty,
                    handle: None,
                    built_version: 0,
                    built_at: None,
                    last_error: None,
                    build_done: None,
                }),
            }),
        }
    }

    /// Mark the cache stale after a file-set membership change.
    ///
    /// Callers must not hold the file-set lock; the pipeline releases
    /// it before notifying.
    pub async fn invalidate(&self) {
        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.state, CacheState::Ready | CacheState::Expired) {
            debug!(built_version = inner.built_version, "Cache invalidated by membership change");
            inner.state = CacheState::Invalid;
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CacheState {
        let mut inner = self.shared.inner.lock().await;
        Shared::apply_lazy_expiry(&mut inner, self.shared.ttl);
        inner.state.clone()
    }

    /// Reason the last build failed, if it did.
    pub async fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().await.last_error.clone()
    }

    /// Get a cache handle that is valid for the current file-set
    /// version, building or rebuilding as needed.
    ///
    /// Returns `Ok(None)` when there are no ready artifacts (nothing to
    /// cache). Returns an error only when a build was attempted and
    /// failed; callers fall back to inline file handles for that turn.
    pub async fn get_valid_handle(&self) -> std::result::Result<Option<CacheHandle>, BackendError> {
        loop {
            // Snapshot membership before inspecting cache state so a
            // returned handle can never predate the caller's view.
            let (version, handles) = {
                let files = self.shared.files.read().await;
                (files.version(), files.ready_handles())
            };

            if handles.is_empty() {
                let rx = {
                    let mut inner = self.shared.inner.lock().await;
                    match &inner.build_done {
                        None => {
                            if let Some(old) = inner.handle.take() {
                                self.shared.spawn_delete(old);
                            }
                            inner.state = CacheState::Empty;
                            return Ok(None);
                        }
                        // A build is racing an emptying file set; wait it out.
                        Some(tx) => tx.subscribe(),
                    }
                };
                let mut rx = rx;
                let _ = rx.recv().await;
                continue;
            }

            let mut rx = {
                let mut inner = self.shared.inner.lock().await;
                Shared::apply_lazy_expiry(&mut inner, self.shared.ttl);

                if inner.state == CacheState::Ready && inner.built_version == version {
                    return Ok(inner.handle.clone());
                }

                match &inner.build_done {
                    Some(tx) => tx.subscribe(),
                    None => {
                        // Claim the single flight. The build runs on a
                        // detached task so a cancelled caller cannot
                        // strand the waiters behind a flight that never
                        // completes.
                        let (tx, rx) = broadcast::channel(1);
                        inner.state = CacheState::Building;
                        inner.build_done = Some(tx);
                        tokio::spawn(Arc::clone(&self.shared).build(version, handles));
                        rx
                    }
                }
            };

            match rx.recv().await {
                Ok(BuildOutcome::Failed(e)) => return Err(e),
                // Built, subsumed, or a closed channel: re-evaluate
                // against current membership.
                _ => {}
            }
        }
    }

    /// Session teardown: delete the remote object if one exists.
    pub async fn teardown(&self) {
        let handle = {
            let mut inner = self.shared.inner.lock().await;
            inner.state = CacheState::Empty;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = self.shared.backend.delete_cache(&handle).await {
                debug!(handle = %handle, error = %e, "Cache delete at teardown failed");
            }
        }
    }
}

impl Shared {
    fn apply_lazy_expiry(inner: &mut CacheInner, ttl: Duration) {
        if inner.state == CacheState::Ready
            && inner.built_at.is_some_and(|at| at.elapsed() >= ttl)
        {
            inner.state = CacheState::Expired;
        }
    }

    /// Run one build attempt on its own task and broadcast the outcome.
    /// The spawner has already claimed the single-flight slot.
    async fn build(self: Arc<Self>, snapshot_version: u64, handles: Vec<RemoteFile>) {
        info!(
            files = handles.len(),
            version = snapshot_version,
            "Building context cache"
        );

        let result = self
            .backend
            .create_cache(&self.model, &handles, self.ttl)
            .await;

        // Re-read the version before taking the state lock; never hold
        // both locks at once.
        let current_version = self.files.read().await.version();

        let mut inner = self.inner.lock().await;
        let done = inner.build_done.take();

        let outcome = match result {
            Ok(new_handle) => {
                if let Some(old) = inner.handle.take() {
                    self.spawn_delete(old);
                }
                if current_version != snapshot_version {
                    // Subsumed build: membership moved while the remote
                    // object was being created. Discard it.
                    debug!(
                        snapshot_version,
                        current_version, "Cache build subsumed by newer membership"
                    );
                    self.spawn_delete(new_handle);
                    inner.state = CacheState::Invalid;
                    BuildOutcome::Subsumed
                } else {
                    inner.state = CacheState::Ready;
                    inner.handle = Some(new_handle.clone());
                    inner.built_version = snapshot_version;
                    inner.built_at = Some(Instant::now());
                    inner.last_error = None;
                    info!(handle = %new_handle, "Context cache ready");
                    BuildOutcome::Built
                }
            }
            Err(e) => {
                warn!(error = %e, "Cache build failed");
                inner.state = CacheState::Invalid;
                inner.last_error = Some(e.to_string());
                BuildOutcome::Failed(e)
            }
        };
        drop(inner);

        if let Some(tx) = done {
            let _ = tx.send(outcome);
        }
    }

    /// Best-effort remote deletion of a superseded cache object.
    fn spawn_delete(&self, handle: CacheHandle) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.delete_cache(&handle).await {
                debug!(handle = %handle, error = %e, "Failed to delete superseded cache");
            }
        });
    }
}
