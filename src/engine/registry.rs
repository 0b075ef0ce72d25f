use std::collections::HashMap;

use tracing::{debug, warn};

use crate::db::Database;
use crate::error::KbResult;
use crate::models::{Concept, Context, Pid};

/// Session-owned cache of contexts and concepts.
///
/// Contexts are keyed by prefix, concepts by PID. Concepts are cached with
/// their inherited properties already computed, so a parent is always loaded
/// (and cached) before any of its children.
#[derive(Debug, Default)]
pub struct Registry {
    contexts: HashMap<String, Context>,
    concepts: HashMap<Pid, Concept>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached context, loading it from storage on a miss.
    pub fn context(&mut self, db: &Database, prefix: &str) -> KbResult<Option<&mut Context>> {
        if !self.contexts.contains_key(prefix) {
            let Some(context) = db.get_context(prefix)? else {
                return Ok(None);
            };
            debug!(prefix, "Loaded context");
            self.contexts.insert(prefix.to_string(), context);
        }
        Ok(self.contexts.get_mut(prefix))
    }

    pub fn insert_context(&mut self, context: Context) {
        self.contexts.insert(context.prefix.clone(), context);
    }

    /// Cached concept with inherited properties, loading the parent chain
    /// from storage as needed.
    pub fn concept(&mut self, db: &Database, pid: &Pid) -> KbResult<Option<Concept>> {
        if let Some(concept) = self.concepts.get(pid) {
            return Ok(Some(concept.clone()));
        }
        let Some(mut concept) = db.get_concept_by_pid(pid)? else {
            return Ok(None);
        };
        if let Some(parent_pid) = concept.parent.clone() {
            match self.concept(db, &parent_pid)? {
                Some(parent) => concept.inherit_from(&parent),
                None => warn!(%pid, parent = %parent_pid, "Parent concept is missing"),
            }
        }
        debug!(%pid, "Loaded concept");
        self.concepts.insert(pid.clone(), concept.clone());
        Ok(Some(concept))
    }

    pub fn insert_concept(&mut self, concept: Concept) {
        self.concepts.insert(concept.pid.clone(), concept);
    }

    /// Drop a context and every concept minted in it.
    pub fn forget_context(&mut self, prefix: &str) {
        self.contexts.remove(prefix);
        self.concepts.retain(|pid, _| pid.context != prefix);
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
        self.concepts.clear();
    }
}
