//! Composer registry keyed by thread.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ThreadlineConfig;
use crate::session::{Collaborators, Composer};
use crate::types::ThreadId;

/// Owns one composer per open thread view.
#[derive(Debug)]
pub struct ComposerRegistry {
    config: ThreadlineConfig,
    collaborators: Collaborators,
    composers: HashMap<ThreadId, Arc<Composer>>,
}

impl ComposerRegistry {
    pub fn new(config: ThreadlineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            composers: HashMap::new(),
        }
    }

    /// Get or create the composer for a thread.
    pub fn get_or_create(&mut self, thread_id: ThreadId) -> Arc<Composer> {
        let config = &self.config;
        let collaborators = &self.collaborators;
        self.composers
            .entry(thread_id)
            .or_insert_with(|| {
                debug!(%thread_id, "Creating composer");
                Arc::new(Composer::new(thread_id, config.clone(), collaborators.clone()))
            })
            .clone()
    }

    pub fn get(&self, thread_id: ThreadId) -> Option<Arc<Composer>> {
        self.composers.get(&thread_id).cloned()
    }

    /// Dispose of a thread's composer, stopping any running turn.
    pub fn close(&mut self, thread_id: ThreadId) -> Option<Arc<Composer>> {
        let composer = self.composers.remove(&thread_id)?;
        if composer.stop() {
            debug!(%thread_id, "Stopped running turn on close");
        }
        Some(composer)
    }

    pub fn thread_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.composers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.composers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composers.is_empty()
    }
}
