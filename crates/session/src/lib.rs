//! # DocShelf Session
//!
//! The conversational session engine: wires the ingestion pipeline,
//! context cache manager, token budget tracker, and turn orchestrator
//! around one shared [`FileSet`] and [`Transcript`].
//!
//! [`Session`] is the facade the CLI (or any embedder) talks to:
//! attach files, send messages, watch the budget.

pub mod budget;
pub mod cache;
pub mod ingest;
pub mod orchestrator;
pub mod presets;

pub use budget::{estimate_tokens, Admission, BudgetSnapshot, BudgetTracker, SYSTEM_OVERHEAD_TOKENS};
pub use cache::{CacheManager, CacheState};
pub use ingest::{IngestionPipeline, PipelineOptions};
pub use orchestrator::{AssistantReply, TurnOrchestrator};
pub use presets::{resolve, Resolved, DEFAULT_SYSTEM_PROMPT};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use docshelf_config::AppConfig;
use docshelf_core::artifact::{Artifact, ArtifactId, ArtifactStatus, FileSet};
use docshelf_core::backend::ReasoningDepth;
use docshelf_core::error::{IngestError, TurnError};
use docshelf_core::message::Transcript;
use docshelf_core::tool::ToolRegistry;
use docshelf_core::{Backend, ConverterSet};

/// One conversational session over a shelf of attached files.
pub struct Session {
    files: Arc<RwLock<FileSet>>,
    transcript: Arc<Mutex<Transcript>>,
    cache: Arc<CacheManager>,
    pipeline: Arc<IngestionPipeline>,
    orchestrator: TurnOrchestrator,
    budget: BudgetTracker,
}

impl Session {
    /// Create a session with the built-in tool registry.
    pub fn new(
        config: &AppConfig,
        backend: Arc<dyn Backend>,
        converters: Arc<dyn ConverterSet>,
    ) -> std::result::Result<Self, IngestError> {
        Self::with_tools(config, backend, converters, docshelf_tools::default_registry())
    }

    /// Create a session with a caller-supplied tool registry.
    pub fn with_tools(
        config: &AppConfig,
        backend: Arc<dyn Backend>,
        converters: Arc<dyn ConverterSet>,
        tools: ToolRegistry,
    ) -> std::result::Result<Self, IngestError> {
        let files = Arc::new(RwLock::new(FileSet::new(config.max_files)));
        let transcript = Arc::new(Mutex::new(Transcript::new()));
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&backend),
            Arc::clone(&files),
            config.model.clone(),
            config.cache_ttl(),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&backend),
            converters,
            Arc::clone(&files),
            Arc::clone(&cache),
            PipelineOptions::from_config(config),
        )?);
        let budget = BudgetTracker::new(config.max_context_tokens);
        let orchestrator = TurnOrchestrator::new(
            backend,
            Arc::clone(&files),
            Arc::clone(&cache),
            budget.clone(),
            Arc::new(tools),
            Arc::clone(&transcript),
            config.model.clone(),
            config.turn.tool_iteration_limit,
        );
        Ok(Self {
            files,
            transcript,
            cache,
            pipeline,
            orchestrator,
            budget,
        })
    }

    /// Attach a local file to the shelf.
    pub async fn attach_path(&self, path: PathBuf) -> std::result::Result<ArtifactId, IngestError> {
        self.pipeline.attach_path(path).await
    }

    /// Attach a URL (direct file download or page scrape).
    pub async fn attach_url(&self, url: &str) -> std::result::Result<ArtifactId, IngestError> {
        self.pipeline.attach_url(url).await
    }

    /// Remove an artifact, cancelling its pipeline work if in flight.
    pub async fn remove(&self, id: &ArtifactId) -> std::result::Result<Artifact, IngestError> {
        self.pipeline.remove(id).await
    }

    /// Pipeline status of one artifact.
    pub async fn status(&self, id: &ArtifactId) -> Option<ArtifactStatus> {
        self.pipeline.status(id).await
    }

    /// Snapshot of all artifacts, in attachment order.
    pub async fn artifacts(&self) -> Vec<Artifact> {
        self.files.read().await.iter().cloned().collect()
    }

    /// Send a message at the baseline reasoning depth (or the preset's,
    /// when the message is a slash command).
    pub async fn send(&self, text: &str) -> std::result::Result<AssistantReply, TurnError> {
        self.orchestrator.send_turn(text, None).await
    }

    /// Send a message at an explicit reasoning depth.
    pub async fn send_with_depth(
        &self,
        text: &str,
        depth: ReasoningDepth,
    ) -> std::result::Result<AssistantReply, TurnError> {
        self.orchestrator.send_turn(text, Some(depth)).await
    }

    /// Current budget snapshot.
    pub async fn budget(&self) -> BudgetSnapshot {
        let files = self.files.read().await;
        let transcript = self.transcript.lock().await;
        self.budget.snapshot(&files, &transcript)
    }

    /// Current cache state, for display.
    pub async fn cache_state(&self) -> CacheState {
        self.cache.state().await
    }

    /// Copy of the conversation so far.
    pub async fn transcript(&self) -> Transcript {
        self.transcript.lock().await.clone()
    }

    /// Tear down remote state (the context cache). Call before exit.
    pub async fn close(&self) {
        self.cache.teardown().await;
    }
}
