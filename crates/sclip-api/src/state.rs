//! Application state.

use std::sync::Arc;

use sclip_queue::{JobRegistry, ProgressBroadcaster};
use sclip_storage::AnalysisCache;
use sclip_worker::{Collaborators, PipelineExecutor, WorkerConfig};

use crate::config::ApiConfig;
use crate::error::ApiResult;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub executor: Arc<PipelineExecutor>,
}

impl AppState {
    /// Build the registry, broadcaster, cache and executor from configuration.
    pub async fn new(config: ApiConfig, worker: &WorkerConfig) -> ApiResult<Self> {
        let cache = AnalysisCache::open(worker.cache_dir.clone())
            .await?
            .with_max_age(worker.cache_max_age);
        let collaborators = Collaborators::from_config(worker)?;
        let executor = PipelineExecutor::new(
            worker,
            Arc::new(JobRegistry::new()),
            Arc::new(ProgressBroadcaster::default()),
            cache,
            collaborators,
        );
        Ok(Self::with_executor(config, Arc::new(executor)))
    }

    pub fn with_executor(config: ApiConfig, executor: Arc<PipelineExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.executor.registry()
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        self.executor.broadcaster()
    }

    pub fn cache(&self) -> &AnalysisCache {
        self.executor.cache()
    }
}
