//! Identity resolution: raw identifier to canonical PID.
//!
//! Full and version-qualified identifiers are direct storage lookups.
//! Context-qualified identifiers are looked up in the named context only.
//! Bare names are searched breadth-first over the search-path graph, starting
//! from the base context; the first context that defines the name wins.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use super::Registry;
use crate::db::Database;
use crate::error::{KbError, KbResult};
use crate::models::{Identifier, KindFilter, Resolved, ROOT_CONCEPT};

pub struct Resolver<'a> {
    db: &'a Database,
    registry: &'a mut Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a Database, registry: &'a mut Registry) -> Self {
        Self { db, registry }
    }

    /// Resolve `raw` to a PID of one of the wanted kinds.
    ///
    /// `base` is only consulted for bare names; without one a bare name
    /// fails with [`KbError::NoContextSet`].
    pub fn resolve(&mut self, raw: &str, base: Option<&str>, kind: KindFilter) -> KbResult<Resolved> {
        let found = match Identifier::classify(raw) {
            Identifier::Full(pid) => self.db.lookup_by_full_pid(pid, kind)?,
            Identifier::VersionQualified {
                context,
                marker,
                name,
            } => self.db.lookup_versioned(context, marker, name, kind)?,
            Identifier::ContextQualified { context, name } => {
                if self.registry.context(self.db, context)?.is_none() {
                    return Err(KbError::ContextNotFound(context.to_string()));
                }
                match self.lookup_in(context, name, kind)? {
                    Some(found) => Some(found),
                    None => self.root_fallback(name, kind)?,
                }
            }
            Identifier::Bare(name) => {
                let base = base.ok_or_else(|| KbError::NoContextSet("resolve".to_string()))?;
                match self.search(base, name, kind)? {
                    Some(found) => Some(found),
                    None => self.root_fallback(name, kind)?,
                }
            }
        };

        match found {
            Some(resolved) => {
                debug!(raw, pid = %resolved.pid, kind = resolved.kind.as_str(), "Resolved");
                Ok(resolved)
            }
            None => Err(not_found(raw, kind)),
        }
    }

    /// Breadth-first search from `base` along search paths.
    fn search(&mut self, base: &str, name: &str, kind: KindFilter) -> KbResult<Option<Resolved>> {
        if self.registry.context(self.db, base)?.is_none() {
            return Err(KbError::ContextNotFound(base.to_string()));
        }

        let mut queue = VecDeque::from([base.to_string()]);
        let mut visited = HashSet::new();

        while let Some(prefix) = queue.pop_front() {
            if !visited.insert(prefix.clone()) {
                continue;
            }
            let Some(context) = self.registry.context(self.db, &prefix)? else {
                warn!(%prefix, "Skipping search-path entry for missing context");
                continue;
            };
            let search_path = context.search_path.clone();

            if let Some(found) = self.lookup_in(&prefix, name, kind)? {
                return Ok(Some(found));
            }
            debug!(%prefix, name, "Not found, following search path");
            queue.extend(search_path);
        }
        Ok(None)
    }

    /// Look `name` up inside one context, concepts first.
    fn lookup_in(&self, prefix: &str, name: &str, kind: KindFilter) -> KbResult<Option<Resolved>> {
        if kind.has_concept() {
            if let Some(pid) = self.db.concept_pid(prefix, name)? {
                return Ok(Some(Resolved::concept(pid)));
            }
        }
        if kind.has_instance() {
            if let Some(pid) = self.db.instance_pid(prefix, name)? {
                return Ok(Some(Resolved::instance(pid)));
            }
        }
        Ok(None)
    }

    fn root_fallback(&self, name: &str, kind: KindFilter) -> KbResult<Option<Resolved>> {
        if name == ROOT_CONCEPT && kind.has_concept() {
            return Ok(Some(Resolved::concept(self.db.id_for_root_concept()?)));
        }
        Ok(None)
    }
}

/// The error for an exhausted resolution: concept-only searches report a
/// missing concept, anything involving instances a missing instance.
pub fn not_found(raw: &str, kind: KindFilter) -> KbError {
    match kind {
        KindFilter::Concept => KbError::ConceptNotFound(raw.to_string()),
        KindFilter::Instance | KindFilter::Both => KbError::InstanceNotFound(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_depends_on_kind() {
        assert!(matches!(
            not_found("x", KindFilter::Concept),
            KbError::ConceptNotFound(_)
        ));
        assert!(matches!(
            not_found("x", KindFilter::Instance),
            KbError::InstanceNotFound(_)
        ));
        assert!(matches!(
            not_found("x", KindFilter::Both),
            KbError::InstanceNotFound(_)
        ));
    }
}
