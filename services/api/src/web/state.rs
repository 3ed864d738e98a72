//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use novel_pipeline_core::ports::{PipelineStore, SessionResolver};
use novel_pipeline_core::{ChapterService, ChunkManager, ProgressTracker, ReaderService};

use crate::config::Config;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionResolver>,
    pub reader: Arc<ReaderService>,
    pub progress: Arc<ProgressTracker>,
    pub chapters: Arc<ChapterService>,
}

impl AppState {
    /// Wires every pipeline service onto one store.
    pub fn new<S>(store: Arc<S>, config: Arc<Config>) -> Self
    where
        S: PipelineStore + 'static,
    {
        let pipeline: Arc<dyn PipelineStore> = store.clone();
        let manager = ChunkManager::new(pipeline.clone(), config.max_concurrent_rechunks);
        Self {
            sessions: store,
            reader: Arc::new(ReaderService::new(pipeline.clone(), config.reader_settings())),
            progress: Arc::new(ProgressTracker::new(pipeline.clone())),
            chapters: Arc::new(ChapterService::new(
                pipeline,
                manager,
                config.max_chunk_size,
                config.rechunk_lock_policy,
            )),
            config,
        }
    }
}
