use std::collections::HashMap;
use std::sync::Arc;

use gleaner_core::FetchJob;

use crate::context::EngineContext;
use crate::error::FetchError;
use crate::fetcher::{Fetcher, RedditCliFetcher};

/// Builds a fetcher for one job.
pub type FetcherFactory = fn(FetchJob, EngineContext) -> Arc<dyn Fetcher>;

/// Maps fetcher type tags to factories.
pub struct FetcherRegistry {
    factories: HashMap<String, FetcherFactory>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in fetcher type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RedditCliFetcher::TYPE, RedditCliFetcher::factory);
        registry
    }

    /// Register `factory` under `fetcher_type`, replacing any previous one.
    pub fn register(&mut self, fetcher_type: impl Into<String>, factory: FetcherFactory) {
        self.factories.insert(fetcher_type.into(), factory);
    }

    /// Build the fetcher for `job` according to its `fetcher_type`.
    pub fn build(&self, job: FetchJob, ctx: EngineContext) -> Result<Arc<dyn Fetcher>, FetchError> {
        match self.factories.get(&job.fetcher_type) {
            Some(factory) => Ok(factory(job, ctx)),
            None => Err(FetchError::UnknownFetcherType(job.fetcher_type)),
        }
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
