use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Registry, Resolver};
use crate::db::Database;
use crate::error::{KbError, KbResult};
use crate::models::naming::{is_concept_name, is_identifier, is_property_name};
use crate::models::*;

/// Precondition levels, checked as a pipeline in this order.
///
/// Each level includes the ones before it: [`Guard::Write`] checks that the
/// session is open, then that a context is current, then that it is writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Guard {
    Open,
    InContext,
    Write,
}

#[derive(Debug, Clone)]
struct OpenSession {
    id: String,
    user: String,
    current: Option<Current>,
}

#[derive(Debug, Clone)]
struct Current {
    prefix: String,
    mode: AccessMode,
}

/// One user's view of the knowledge base.
///
/// States: closed, open without a current context, and open inside a context
/// with an access mode. Every operation first runs its [`Guard`] pipeline.
pub struct Session {
    db: Database,
    site: String,
    registry: Registry,
    open: Option<OpenSession>,
}

impl Session {
    /// A closed session over an initialised store.
    pub fn new(db: Database) -> KbResult<Self> {
        let site = db
            .site()?
            .ok_or_else(|| anyhow::anyhow!("Knowledge base is not initialised; run `ckb init`"))?;
        Ok(Self {
            db,
            site,
            registry: Registry::new(),
            open: None,
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.open.as_ref().map(|s| s.id.as_str())
    }

    /// Prefix and mode of the current context.
    pub fn current_context(&self) -> Option<(&str, AccessMode)> {
        self.open
            .as_ref()
            .and_then(|s| s.current.as_ref())
            .map(|c| (c.prefix.as_str(), c.mode))
    }

    // ============================================================
    // Guards
    // ============================================================

    pub fn guard(&self, op: &str, level: Guard) -> KbResult<()> {
        self.require_open(op)?;
        if level >= Guard::InContext {
            self.require_in_context(op)?;
        }
        if level >= Guard::Write {
            self.require_write(op)?;
        }
        Ok(())
    }

    fn require_open(&self, op: &str) -> KbResult<()> {
        if self.open.is_none() {
            warn!(op, "Rejected: session closed");
            return Err(KbError::ClosedSession(op.to_string()));
        }
        Ok(())
    }

    fn require_in_context(&self, op: &str) -> KbResult<()> {
        if self.current_context().is_none() {
            warn!(op, "Rejected: no current context");
            return Err(KbError::NoContextSet(op.to_string()));
        }
        Ok(())
    }

    fn require_write(&self, op: &str) -> KbResult<()> {
        match self.current_context() {
            Some((prefix, _)) if prefix == ROOT_CONTEXT => Ok(()),
            Some((_, AccessMode::Write)) => Ok(()),
            _ => {
                warn!(op, "Rejected: context not open for writing");
                Err(KbError::WritingPermissionDenied(op.to_string()))
            }
        }
    }

    fn current_prefix(&self, op: &str) -> KbResult<String> {
        self.current_context()
            .map(|(prefix, _)| prefix.to_string())
            .ok_or_else(|| KbError::NoContextSet(op.to_string()))
    }

    /// Reject requests that carry another session's id.
    pub fn check_session_id(&self, id: &str) -> KbResult<()> {
        match &self.open {
            None => Err(KbError::ClosedSession("request".to_string())),
            Some(open) if open.id == id => Ok(()),
            Some(_) => Err(KbError::InvalidSession(id.to_string())),
        }
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    /// Open the session for `user`, re-entering the context that was current
    /// when the store was last closed.
    ///
    /// Only one user may be logged in at a time. The same user opening again
    /// gets the existing session back.
    pub fn open(&mut self, input: SessionOpenInput) -> KbResult<SessionOpened> {
        if let Some(open) = &self.open {
            if open.user != input.user {
                return Err(KbError::AlreadyLoggedIn(open.user.clone()));
            }
            return Ok(SessionOpened {
                session_id: open.id.clone(),
                current_context: open.current.as_ref().map(|c| c.prefix.clone()),
            });
        }

        let id = input
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let current = self.restore_last_context()?;
        info!(user = %input.user, session = %id, context = ?current.as_ref().map(|c| &c.prefix), "Session opened");

        let current_context = current.as_ref().map(|c| c.prefix.clone());
        self.open = Some(OpenSession {
            id: id.clone(),
            user: input.user,
            current,
        });
        Ok(SessionOpened {
            session_id: id,
            current_context,
        })
    }

    fn restore_last_context(&mut self) -> KbResult<Option<Current>> {
        let Some(prefix) = self.db.get_last_context()? else {
            return Ok(None);
        };
        let Some(context) = self.registry.context(&self.db, &prefix)? else {
            warn!(%prefix, "Remembered context no longer exists");
            return Ok(None);
        };
        let mode = match context.state {
            ContextState::Frozen => AccessMode::Read,
            _ => context.mode.unwrap_or(AccessMode::Read),
        };
        context.mode = Some(mode);
        self.db.update_mode(&prefix, Some(mode))?;
        Ok(Some(Current { prefix, mode }))
    }

    /// Close the session, remembering the current context for the next open.
    pub fn close(&mut self) -> KbResult<()> {
        self.guard("close", Guard::Open)?;
        if let Some(open) = self.open.take() {
            if let Some(current) = &open.current {
                self.db.set_last_context(Some(&current.prefix))?;
            }
            info!(user = %open.user, session = %open.id, "Session closed");
        }
        self.registry.clear();
        Ok(())
    }

    /// Make `prefix` the current context, leaving the previous one first.
    pub fn enter(&mut self, prefix: &str, mode: AccessMode) -> KbResult<()> {
        self.guard("enter", Guard::Open)?;

        let context = self
            .registry
            .context(&self.db, prefix)?
            .ok_or_else(|| KbError::ContextNotFound(prefix.to_string()))?;
        if context.state == ContextState::Frozen && mode == AccessMode::Write {
            return Err(KbError::WritingPermissionDenied(format!(
                "context '{prefix}' is frozen, enter it for reading"
            )));
        }

        self.leave_current()?;

        let context = self
            .registry
            .context(&self.db, prefix)?
            .ok_or_else(|| KbError::ContextNotFound(prefix.to_string()))?;
        context.activate();
        context.mode = Some(mode);
        let state = context.state;
        self.db.update_state(prefix, state)?;
        self.db.update_mode(prefix, Some(mode))?;
        self.db.set_last_context(Some(prefix))?;

        if let Some(open) = self.open.as_mut() {
            open.current = Some(Current {
                prefix: prefix.to_string(),
                mode,
            });
        }
        info!(prefix, mode = mode.as_str(), "Entered context");
        Ok(())
    }

    /// Drop the current context.
    pub fn leave(&mut self) -> KbResult<()> {
        self.guard("leave", Guard::InContext)?;
        self.leave_current()?;
        self.db.set_last_context(None)?;
        Ok(())
    }

    fn leave_current(&mut self) -> KbResult<()> {
        let Some(current) = self.open.as_mut().and_then(|s| s.current.take()) else {
            return Ok(());
        };
        if let Some(context) = self.registry.context(&self.db, &current.prefix)? {
            context.mode = None;
        }
        self.db.update_mode(&current.prefix, None)?;
        info!(prefix = %current.prefix, "Left context");
        Ok(())
    }

    // ============================================================
    // Status
    // ============================================================

    pub fn status(&self) -> KbResult<KbStatus> {
        self.guard("status", Guard::Open)?;
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| KbError::ClosedSession("status".to_string()))?;
        Ok(KbStatus {
            session_id: open.id.clone(),
            site: self.site.clone(),
            username: open.user.clone(),
            current_context: open.current.as_ref().map(|c| c.prefix.clone()),
            contexts_available: self.db.context_list()?,
        })
    }

    /// Describe `prefix`, or the current context when `None`.
    pub fn context_status(&mut self, prefix: Option<&str>) -> KbResult<ContextStatus> {
        self.guard("context_status", Guard::Open)?;
        let prefix = match prefix {
            Some(prefix) => prefix.to_string(),
            None => self.current_prefix("context_status")?,
        };
        let context = self
            .registry
            .context(&self.db, &prefix)?
            .ok_or_else(|| KbError::ContextNotFound(prefix.clone()))?
            .clone();
        Ok(ContextStatus {
            title: context.title,
            prefix: context.prefix,
            identifier: context.identifier,
            search_path: context.search_path,
            owner: context.owner,
            mode: context.mode,
            state: context.state,
            last_marker: self
                .db
                .get_context(&prefix)?
                .map(|c| c.last_marker)
                .unwrap_or(context.last_marker),
            concepts: self.db.concepts_for_context(&prefix)?,
            instances: self.db.instances_for_context(&prefix)?,
        })
    }

    // ============================================================
    // Contexts
    // ============================================================

    /// Create a context. Without an explicit search path the new context
    /// searches the current one.
    pub fn new_context(&mut self, input: CreateContextInput) -> KbResult<Context> {
        self.guard("new_context", Guard::Write)?;

        if self.db.has_context(&input.prefix)? {
            return Err(KbError::ExistingContext(input.prefix));
        }
        if !is_identifier(&input.prefix) {
            return Err(KbError::IdentifierWrong(input.prefix));
        }

        let (session_id, user) = self
            .open
            .as_ref()
            .map(|s| (s.id.clone(), s.user.clone()))
            .ok_or_else(|| KbError::ClosedSession("new_context".to_string()))?;
        let owner = input.owner.unwrap_or(user);
        let search_path = match input.search_path {
            Some(path) => path,
            None => vec![self.current_prefix("new_context")?],
        };
        self.check_contexts_exist(&search_path)?;

        let now = Utc::now();
        let title = input.title.unwrap_or_else(|| {
            format!(
                "Context {} for {owner} created in session {session_id} at {}",
                input.prefix,
                now.to_rfc3339()
            )
        });
        let mut context = Context {
            identifier: format!("{}:{}", self.site, input.prefix),
            prefix: input.prefix,
            title,
            owner,
            search_path,
            state: ContextState::New,
            mode: None,
            last_marker: 0,
            created_at: now,
        };
        context.last_marker = self.db.create_context(&context)?;
        self.registry.insert_context(context.clone());
        info!(prefix = %context.prefix, search_path = ?context.search_path, "Created context");
        Ok(context)
    }

    pub fn get_search_path(&mut self) -> KbResult<Vec<String>> {
        self.guard("get_search_path", Guard::InContext)?;
        let prefix = self.current_prefix("get_search_path")?;
        let context = self
            .registry
            .context(&self.db, &prefix)?
            .ok_or_else(|| KbError::ContextNotFound(prefix.clone()))?;
        Ok(context.search_path.clone())
    }

    pub fn set_search_path(&mut self, search_path: Vec<String>) -> KbResult<()> {
        self.guard("set_search_path", Guard::Write)?;
        self.check_contexts_exist(&search_path)?;

        let prefix = self.current_prefix("set_search_path")?;
        self.db.update_search_path(&prefix, &search_path)?;
        if let Some(context) = self.registry.context(&self.db, &prefix)? {
            context.search_path = search_path;
        }
        info!(%prefix, "Search path replaced");
        Ok(())
    }

    fn check_contexts_exist(&mut self, prefixes: &[String]) -> KbResult<()> {
        for prefix in prefixes {
            if self.registry.context(&self.db, prefix)?.is_none() {
                return Err(KbError::ContextNotFound(prefix.clone()));
            }
        }
        Ok(())
    }

    /// Delete the current context with everything defined in it.
    pub fn reset_context(&mut self) -> KbResult<()> {
        self.guard("reset_context", Guard::Write)?;
        let prefix = self.current_prefix("reset_context")?;
        if prefix == ROOT_CONTEXT {
            return Err(KbError::WritingPermissionDenied(
                "the root context cannot be reset".to_string(),
            ));
        }

        self.db.delete_context(&prefix)?;
        self.registry.forget_context(&prefix);
        if let Some(open) = self.open.as_mut() {
            open.current = None;
        }
        info!(%prefix, "Context reset");
        Ok(())
    }

    /// Make the current context permanently read-only.
    pub fn freeze_context(&mut self) -> KbResult<()> {
        self.guard("freeze_context", Guard::Write)?;
        let prefix = self.current_prefix("freeze_context")?;
        if prefix == ROOT_CONTEXT {
            return Err(KbError::WritingPermissionDenied(
                "the root context cannot be frozen".to_string(),
            ));
        }

        if let Some(context) = self.registry.context(&self.db, &prefix)? {
            context.freeze();
        }
        self.db.update_state(&prefix, ContextState::Frozen)?;
        self.db.update_mode(&prefix, Some(AccessMode::Read))?;
        if let Some(current) = self.open.as_mut().and_then(|s| s.current.as_mut()) {
            current.mode = AccessMode::Read;
        }
        info!(%prefix, "Context frozen");
        Ok(())
    }

    // ============================================================
    // Resolution and reads
    // ============================================================

    /// Resolve `raw` against `base`, defaulting to the current context.
    pub fn resolve(&mut self, raw: &str, base: Option<&str>, kind: KindFilter) -> KbResult<Resolved> {
        self.guard("resolve", Guard::Open)?;
        self.resolve_unguarded(raw, base, kind)
    }

    fn resolve_unguarded(
        &mut self,
        raw: &str,
        base: Option<&str>,
        kind: KindFilter,
    ) -> KbResult<Resolved> {
        let base = match base {
            Some(base) => Some(base.to_string()),
            None => self.current_context().map(|(prefix, _)| prefix.to_string()),
        };
        Resolver::new(&self.db, &mut self.registry).resolve(raw, base.as_deref(), kind)
    }

    fn root_pid(&self) -> KbResult<Pid> {
        Ok(self.db.id_for_root_concept()?)
    }

    fn load_concept(&mut self, pid: &Pid) -> KbResult<Concept> {
        self.registry
            .concept(&self.db, pid)?
            .ok_or_else(|| KbError::ConceptNotFound(pid.to_string()))
    }

    pub fn get_concept(&mut self, identity: &str, base: Option<&str>) -> KbResult<ConceptView> {
        self.guard("get_concept", Guard::Open)?;
        let resolved = self.resolve_unguarded(identity, base, KindFilter::Concept)?;
        let concept = self.load_concept(&resolved.pid)?;
        Ok(concept.view(&self.root_pid()?))
    }

    pub fn get_instance(&mut self, identity: &str) -> KbResult<Instance> {
        self.guard("get_instance", Guard::Open)?;
        let resolved = self.resolve_unguarded(identity, None, KindFilter::Instance)?;
        self.db
            .get_instance_by_pid(&resolved.pid)?
            .ok_or_else(|| KbError::InstanceNotFound(identity.to_string()))
    }

    /// Fetch whichever kind of object `identity` denotes.
    pub fn get(&mut self, identity: &str) -> KbResult<Entry> {
        self.guard("get", Guard::Open)?;
        let resolved = self.resolve_unguarded(identity, None, KindFilter::Both)?;
        match resolved.kind {
            EntryKind::Concept => {
                let concept = self.load_concept(&resolved.pid)?;
                Ok(Entry::Concept(concept.view(&self.root_pid()?)))
            }
            EntryKind::Instance => self
                .db
                .get_instance_by_pid(&resolved.pid)?
                .map(Entry::Instance)
                .ok_or_else(|| KbError::InstanceNotFound(identity.to_string())),
        }
    }

    // ============================================================
    // Concepts
    // ============================================================

    /// Define a concept in the current context.
    pub fn new_concept(&mut self, input: CreateConceptInput) -> KbResult<Pid> {
        self.guard("new_concept", Guard::Write)?;
        let prefix = self.current_prefix("new_concept")?;

        if !is_concept_name(&input.term) {
            return Err(KbError::IdentifierWrong(input.term));
        }
        if let Some(existing) = self.db.concept_pid(&prefix, &input.term)? {
            return Err(KbError::NameInUse {
                name: input.term,
                existing: existing.to_string(),
            });
        }

        let parent_pid = match &input.specialises {
            None => self.root_pid()?,
            Some(identity) => self
                .resolve_unguarded(identity, Some(&prefix), KindFilter::Concept)
                .map(|r| r.pid)
                .map_err(|e| {
                    if e.is_not_found() {
                        KbError::NotAConcept(identity.clone())
                    } else {
                        e
                    }
                })?,
        };
        let parent = self
            .registry
            .concept(&self.db, &parent_pid)?
            .ok_or_else(|| KbError::NotAConcept(parent_pid.to_string()))?;

        let mut pending = Vec::new();
        for kind in PropertyKind::ALL {
            let declared = match kind {
                PropertyKind::Required => &input.required,
                PropertyKind::Recommended => &input.recommended,
                PropertyKind::Optional => &input.optional,
            };
            for (name, range) in declared {
                let range = self.property_range(&prefix, &input.term, name, range)?;
                pending.push((kind, name.clone(), range));
            }
        }

        let site = self.site.clone();
        let term = input.term.clone();
        let concept = self.db.create_concept(&prefix, |marker| {
            let pid = Pid::new(site, prefix.clone(), marker, term.clone());
            let mut concept = Concept {
                pid: pid.clone(),
                label: term,
                prefix: prefix.clone(),
                parent: Some(parent.pid.clone()),
                mutability: input.mutability.unwrap_or_default(),
                description: input.description.unwrap_or_default(),
                state: NEW_ENTRY_STATE.to_string(),
                translation: input.translation,
                direct: PropertyBuckets::default(),
                indirect: PropertyBuckets::default(),
                created_at: Utc::now(),
            };
            for (kind, name, range) in pending {
                let range = match range {
                    PendingRange::Data(datatype) => PropertyRange::Data(datatype),
                    PendingRange::Object(target) => PropertyRange::Object(target),
                    PendingRange::OwnConcept => PropertyRange::Object(pid.clone()),
                };
                concept.direct.get_mut(kind).insert(name, range);
            }
            concept.inherit_from(&parent);
            concept
        })?;

        info!(pid = %concept.pid, parent = %parent_pid, "Created concept");
        let pid = concept.pid.clone();
        self.registry.insert_concept(concept);
        Ok(pid)
    }

    /// Interpret a declared property range: a datatype name, the concept's
    /// own term, or a concept visible from `prefix`.
    fn property_range(
        &mut self,
        prefix: &str,
        term: &str,
        name: &str,
        range: &str,
    ) -> KbResult<PendingRange> {
        if !is_property_name(name) {
            return Err(KbError::IdentifierWrong(name.to_string()));
        }
        if let Some(datatype) = Datatype::from_name(range) {
            return Ok(PendingRange::Data(datatype));
        }
        if range == term {
            return Ok(PendingRange::OwnConcept);
        }
        self.resolve_unguarded(range, Some(prefix), KindFilter::Concept)
            .map(|r| PendingRange::Object(r.pid))
            .map_err(|e| {
                if e.is_not_found() {
                    KbError::NotAConcept(range.to_string())
                } else {
                    e
                }
            })
    }

    // ============================================================
    // Instances
    // ============================================================

    /// Create an instance of `class` in the current context.
    ///
    /// Every extra must name a property of the class (direct or inherited).
    /// Data properties are type-checked; object properties are resolved to
    /// the PID of an instance of the range concept.
    pub fn new_instance(&mut self, input: CreateInstanceInput) -> KbResult<Pid> {
        self.guard("new_instance", Guard::Write)?;
        let prefix = self.current_prefix("new_instance")?;

        if !is_identifier(&input.name) {
            return Err(KbError::IdentifierWrong(input.name));
        }
        if let Some(existing) = self.db.instance_pid(&prefix, &input.name)? {
            return Err(KbError::NameInUse {
                name: input.name,
                existing: existing.to_string(),
            });
        }

        let class = self
            .resolve_unguarded(&input.class, Some(&prefix), KindFilter::Concept)?
            .pid;
        let concept = self.load_concept(&class)?;
        let extras = self.check_extras(&concept, input.extras)?;

        let site = self.site.clone();
        let name = input.name.clone();
        let instance = self.db.create_instance(&prefix, |marker| Instance {
            pid: Pid::new(site, prefix.clone(), marker, name.clone()),
            name,
            prefix: prefix.clone(),
            class: class.clone(),
            state: NEW_ENTRY_STATE.to_string(),
            mutability: input.mutability.unwrap_or_default(),
            extras,
            created_at: Utc::now(),
        })?;

        info!(pid = %instance.pid, class = %class, "Created instance");
        Ok(instance.pid)
    }

    fn check_extras(
        &mut self,
        concept: &Concept,
        extras: Map<String, Value>,
    ) -> KbResult<Map<String, Value>> {
        let properties = concept.get_properties(&PropertyKind::ALL, false);
        let mut checked = Map::new();

        for (property, value) in extras {
            let Some(range) = properties.get(&property) else {
                return Err(KbError::NamePropertyDoesNotExist {
                    property,
                    class: concept.pid.to_string(),
                });
            };
            let mismatch = |property: String| KbError::PropertyRangeNotMatchingType {
                property,
                range: range.to_string(),
                supplied: value.to_string(),
            };
            let value = match range {
                PropertyRange::Data(datatype) => {
                    if !datatype.accepts(&value) {
                        return Err(mismatch(property));
                    }
                    value.clone()
                }
                PropertyRange::Object(target) => {
                    let Some(identity) = value.as_str() else {
                        return Err(mismatch(property));
                    };
                    let target_pid = self
                        .resolve_unguarded(identity, None, KindFilter::Instance)?
                        .pid;
                    let Some(target_instance) = self.db.get_instance_by_pid(&target_pid)? else {
                        return Err(KbError::InstanceNotFound(identity.to_string()));
                    };
                    if !self.db.descendant_concepts(target)?.contains(&target_instance.class) {
                        return Err(mismatch(property));
                    }
                    Value::String(target_pid.to_string())
                }
            };
            checked.insert(property, value);
        }
        Ok(checked)
    }

    // ============================================================
    // Find
    // ============================================================

    /// List the instances matching `input.query`.
    pub fn find(&mut self, input: FindInput) -> KbResult<FindOutput> {
        self.guard("find", Guard::Open)?;

        let mut instances = self.db.all_instances()?;
        self.filter(&input.query, &mut instances)?;
        debug!(matches = instances.len(), "find");

        if input.pid_only && input.only_these.is_none() {
            return Ok(FindOutput::Pids(
                instances.into_iter().map(|i| i.pid).collect(),
            ));
        }

        let mut entries = Vec::with_capacity(instances.len());
        for instance in instances {
            let mut value = serde_json::to_value(&instance).map_err(anyhow::Error::from)?;
            if let (Some(fields), Value::Object(map)) = (&input.only_these, &mut value) {
                map.retain(|key, _| fields.iter().any(|f| f == key));
            }
            entries.push(value);
        }
        Ok(FindOutput::Entries(entries))
    }

    fn filter(&mut self, query: &Query, instances: &mut Vec<Instance>) -> KbResult<()> {
        match query {
            Query::And(queries) => {
                for query in queries {
                    self.filter(query, instances)?;
                }
            }
            Query::Isa(identity) => {
                let class = self
                    .resolve_unguarded(identity, None, KindFilter::Concept)?
                    .pid;
                let descendants: HashSet<Pid> =
                    self.db.descendant_concepts(&class)?.into_iter().collect();
                instances.retain(|i| descendants.contains(&i.class));
            }
            Query::IsaExactly(identity) => {
                let class = self
                    .resolve_unguarded(identity, None, KindFilter::Concept)?
                    .pid;
                instances.retain(|i| i.class == class);
            }
            Query::Equals { field, value } => {
                instances.retain(|i| i.field(field).as_ref() == Some(value));
            }
        }
        Ok(())
    }
}

/// A property range decided before the concept's own PID is minted.
enum PendingRange {
    Data(Datatype),
    Object(Pid),
    OwnConcept,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db.initialise_site("local", false).unwrap();
        Session::new(db).unwrap()
    }

    fn login(session: &mut Session) {
        session
            .open(SessionOpenInput {
                user: "alice".into(),
                session_id: None,
            })
            .unwrap();
    }

    #[test]
    fn guard_order_is_open_then_context_then_write() {
        let mut s = session();
        assert!(matches!(
            s.guard("op", Guard::Write),
            Err(KbError::ClosedSession(_))
        ));

        login(&mut s);
        assert!(matches!(
            s.guard("op", Guard::Write),
            Err(KbError::NoContextSet(_))
        ));

        s.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
        s.new_context(CreateContextInput {
            prefix: "lab".into(),
            ..Default::default()
        })
        .unwrap();
        s.enter("lab", AccessMode::Read).unwrap();
        assert!(matches!(
            s.guard("op", Guard::Write),
            Err(KbError::WritingPermissionDenied(_))
        ));
        assert!(s.guard("op", Guard::InContext).is_ok());
    }

    #[test]
    fn root_context_is_exempt_from_the_write_check() {
        let mut s = session();
        login(&mut s);
        s.enter(ROOT_CONTEXT, AccessMode::Read).unwrap();
        assert!(s.guard("op", Guard::Write).is_ok());
    }

    #[test]
    fn storage_failures_are_not_reported_as_missing_concepts() {
        let mut s = session();
        login(&mut s);
        s.enter(ROOT_CONTEXT, AccessMode::Write).unwrap();
        for prefix in ["far", "lab"] {
            s.new_context(CreateContextInput {
                prefix: prefix.into(),
                ..Default::default()
            })
            .unwrap();
        }
        s.enter("lab", AccessMode::Write).unwrap();
        s.registry.forget_context("far");
        s.db.execute_batch("DROP TABLE context_search_paths").unwrap();

        let err = s
            .new_concept(CreateConceptInput {
                term: "Meter".into(),
                specialises: Some("far:Device".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, KbError::Storage(_)));

        let err = s
            .new_concept(CreateConceptInput {
                term: "Meter".into(),
                optional: [("mount".to_string(), "far:Device".to_string())].into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, KbError::Storage(_)));
    }

    #[test]
    fn a_second_user_cannot_log_in() {
        let mut s = session();
        login(&mut s);
        let err = s
            .open(SessionOpenInput {
                user: "bob".into(),
                session_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, KbError::AlreadyLoggedIn(u) if u == "alice"));
    }

    #[test]
    fn session_id_must_match() {
        let mut s = session();
        assert!(matches!(
            s.check_session_id("x"),
            Err(KbError::ClosedSession(_))
        ));
        login(&mut s);
        let id = s.session_id().unwrap().to_string();
        assert!(s.check_session_id(&id).is_ok());
        assert!(matches!(
            s.check_session_id("other"),
            Err(KbError::InvalidSession(_))
        ));
    }
}
