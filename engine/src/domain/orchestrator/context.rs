//! Shared engine state handed to the orchestrator

use std::sync::Arc;

use super::runner::{ExclusiveRunner, InlineRunner};
use crate::core::config::{CacheConfig, EngineConfig, HistoryConfig};
use crate::data::cache::{CacheError, CacheService};
use crate::domain::history::HistoryManager;
use crate::domain::session::SessionStore;

/// Everything a run needs besides its datasets
#[derive(Clone)]
pub struct EngineContext {
    pub engine: EngineConfig,
    pub cache: Arc<CacheService>,
    pub history: Arc<HistoryManager>,
    pub runner: Arc<dyn ExclusiveRunner>,
    /// Where the current filter states are persisted, if anywhere
    pub session: Option<SessionStore>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("engine", &self.engine)
            .field("history", &self.history)
            .field("session", &self.session.as_ref().map(|s| s.path()))
            .finish()
    }
}

impl EngineContext {
    pub fn new(
        engine: EngineConfig,
        cache: &CacheConfig,
        history: &HistoryConfig,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            engine,
            cache: Arc::new(CacheService::new(cache)?),
            history: Arc::new(HistoryManager::new(history.max_depth)),
            runner: Arc::new(InlineRunner),
            session: None,
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn ExclusiveRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }
}
