mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};

use crate::error::KbError;
use crate::models::*;

/// SQLite-backed store for one site.
///
/// All methods are synchronous and take the connection lock for their whole
/// duration. Marker-minting inserts run in a single transaction together
/// with the counter update.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Site operations
    // ============================================================

    /// Create the root context and root concept for `site`.
    ///
    /// An already initialised store is an error unless `reset` is set, in
    /// which case every context, concept and instance is wiped first.
    pub fn initialise_site(&self, site: &str, reset: bool) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row("SELECT name FROM site WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        if let Some(existing) = existing {
            if !reset {
                bail!("Site '{existing}' is already initialised");
            }
            tracing::info!(site = %existing, "Resetting site");
            tx.execute_batch(
                "DELETE FROM instances;
                 DELETE FROM concept_properties;
                 DELETE FROM concepts;
                 DELETE FROM context_search_paths;
                 DELETE FROM contexts;
                 DELETE FROM site;",
            )?;
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO site (id, name, last_context, created_at) VALUES (1, ?, NULL, ?)",
            (site, &now),
        )?;
        tx.execute(
            "INSERT INTO contexts (prefix, identifier, title, owner, state, mode, last_marker, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, 0, ?)",
            (
                ROOT_CONTEXT,
                format!("{site}:{ROOT_CONTEXT}"),
                "Root context",
                ROOT_CONTEXT,
                ContextState::Active.as_str(),
                &now,
            ),
        )?;
        let root = Pid::new(site, ROOT_CONTEXT, 0, ROOT_CONCEPT);
        tx.execute(
            "INSERT INTO concepts (pid, prefix, marker, name, parent_pid, mutability, description, state, translation, created_at)
             VALUES (?, ?, 0, ?, NULL, ?, ?, ?, '{}', ?)",
            (
                root.to_string(),
                ROOT_CONTEXT,
                ROOT_CONCEPT,
                Mutability::Immutable.as_str(),
                "The root of every specialisation chain",
                NEW_ENTRY_STATE,
                &now,
            ),
        )?;
        tx.commit()?;

        tracing::info!(site, "Site initialised");
        Ok(())
    }

    /// The site name, `None` before [`Database::initialise_site`].
    pub fn site(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let name = conn
            .query_row("SELECT name FROM site WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(name)
    }

    pub fn set_last_context(&self, prefix: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute("UPDATE site SET last_context = ? WHERE id = 1", [prefix])?;
        Ok(())
    }

    pub fn get_last_context(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let last: Option<Option<String>> = conn
            .query_row("SELECT last_context FROM site WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(last.flatten())
    }

    // ============================================================
    // Context operations
    // ============================================================

    pub fn has_context(&self, prefix: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contexts WHERE prefix = ?",
            [prefix],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_context(&self, prefix: &str) -> Result<Option<Context>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let context = conn
            .query_row(
                "SELECT prefix, identifier, title, owner, state, mode, last_marker, created_at
                 FROM contexts WHERE prefix = ?",
                [prefix],
                context_from_row,
            )
            .optional()?;

        let Some(mut context) = context else {
            return Ok(None);
        };
        context.search_path = load_search_path(&conn, prefix)?;
        Ok(Some(context))
    }

    /// Insert a context and return the marker it starts from. Markers
    /// continue from any earlier context that had the same prefix.
    pub fn create_context(&self, context: &Context) -> Result<u64> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let retired: i64 = tx
            .query_row(
                "SELECT last_marker FROM retired_contexts WHERE prefix = ?",
                [&context.prefix],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let last_marker = (context.last_marker as i64).max(retired);
        tx.execute(
            "INSERT INTO contexts (prefix, identifier, title, owner, state, mode, last_marker, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &context.prefix,
                &context.identifier,
                &context.title,
                &context.owner,
                context.state.as_str(),
                context.mode.map(|m| m.as_str()),
                last_marker,
                context.created_at.to_rfc3339(),
            ),
        )?;
        write_search_path(&tx, &context.prefix, &context.search_path)?;
        tx.commit()?;
        Ok(last_marker as u64)
    }

    pub fn update_search_path(&self, prefix: &str, search_path: &[String]) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM context_search_paths WHERE prefix = ?",
            [prefix],
        )?;
        write_search_path(&tx, prefix, search_path)?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_mode(&self, prefix: &str, mode: Option<AccessMode>) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE contexts SET mode = ? WHERE prefix = ?",
            (mode.map(|m| m.as_str()), prefix),
        )?;
        Ok(rows > 0)
    }

    pub fn update_state(&self, prefix: &str, state: ContextState) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE contexts SET state = ? WHERE prefix = ?",
            (state.as_str(), prefix),
        )?;
        Ok(rows > 0)
    }

    /// Every context prefix, sorted.
    pub fn context_list(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT prefix FROM contexts ORDER BY prefix")?;
        let prefixes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(prefixes)
    }

    /// Delete a context together with its concepts and instances.
    ///
    /// Its last marker is kept in `retired_contexts` so a later context with
    /// the same prefix never mints a PID that was already handed out.
    /// Search paths of other contexts that name it are left as they are.
    pub fn delete_context(&self, prefix: &str) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM instances WHERE prefix = ?", [prefix])?;
        tx.execute(
            "DELETE FROM concept_properties
             WHERE concept_pid IN (SELECT pid FROM concepts WHERE prefix = ?)",
            [prefix],
        )?;
        tx.execute("DELETE FROM concepts WHERE prefix = ?", [prefix])?;
        tx.execute(
            "DELETE FROM context_search_paths WHERE prefix = ?",
            [prefix],
        )?;
        tx.execute(
            "INSERT INTO retired_contexts (prefix, last_marker, retired_at)
             SELECT prefix, last_marker, ? FROM contexts WHERE prefix = ?
             ON CONFLICT (prefix) DO UPDATE SET
                last_marker = MAX(last_marker, excluded.last_marker),
                retired_at = excluded.retired_at",
            (Utc::now().to_rfc3339(), prefix),
        )?;
        let rows = tx.execute("DELETE FROM contexts WHERE prefix = ?", [prefix])?;
        tx.execute(
            "UPDATE site SET last_context = NULL WHERE last_context = ?",
            [prefix],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute_batch(sql)?;
        Ok(())
    }

    // ============================================================
    // Concept operations
    // ============================================================

    pub fn has_concept(&self, prefix: &str, name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM concepts WHERE prefix = ? AND name = ?",
            (prefix, name),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Load a concept by its context and label. Only direct properties are
    /// filled in.
    pub fn get_concept(&self, prefix: &str, name: &str) -> Result<Option<Concept>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let concept = conn
            .query_row(
                &format!("{CONCEPT_COLUMNS} WHERE prefix = ? AND name = ?"),
                (prefix, name),
                concept_from_row,
            )
            .optional()?;
        with_properties(&conn, concept)
    }

    pub fn get_concept_by_pid(&self, pid: &Pid) -> Result<Option<Concept>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let concept = conn
            .query_row(
                &format!("{CONCEPT_COLUMNS} WHERE pid = ?"),
                [pid.to_string()],
                concept_from_row,
            )
            .optional()?;
        with_properties(&conn, concept)
    }

    /// Mint the next marker of `prefix` and store the concept `build` makes
    /// from it, in one transaction.
    pub fn create_concept<F>(&self, prefix: &str, build: F) -> Result<Concept>
    where
        F: FnOnce(u64) -> Concept,
    {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let concept = build(next_marker(&tx, prefix)?);

        tx.execute(
            "INSERT INTO concepts (pid, prefix, marker, name, parent_pid, mutability, description, state, translation, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                concept.pid.to_string(),
                &concept.prefix,
                concept.pid.marker as i64,
                &concept.label,
                concept.parent.as_ref().map(|p| p.to_string()),
                concept.mutability.as_str(),
                &concept.description,
                &concept.state,
                serde_json::to_string(&concept.translation)?,
                concept.created_at.to_rfc3339(),
            ),
        )?;
        for kind in PropertyKind::ALL {
            for (name, range) in concept.direct.get(kind) {
                let range_kind = match range {
                    PropertyRange::Data(_) => "data",
                    PropertyRange::Object(_) => "object",
                };
                tx.execute(
                    "INSERT INTO concept_properties (concept_pid, kind, name, range_kind, range)
                     VALUES (?, ?, ?, ?, ?)",
                    (
                        concept.pid.to_string(),
                        kind.as_str(),
                        name,
                        range_kind,
                        range.to_string(),
                    ),
                )?;
            }
        }
        tx.commit()?;
        Ok(concept)
    }

    /// PID of the concept labelled `name` in `prefix`, without loading it.
    pub fn concept_pid(&self, prefix: &str, name: &str) -> Result<Option<Pid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        named_pid(&conn, "concepts", prefix, name)
    }

    /// `root` and every concept specialising it, at any depth.
    pub fn descendant_concepts(&self, root: &Pid) -> Result<Vec<Pid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "WITH RECURSIVE descendants(pid) AS (
                SELECT pid FROM concepts WHERE pid = ?1
                UNION
                SELECT c.pid FROM concepts c JOIN descendants d ON c.parent_pid = d.pid
             )
             SELECT pid FROM descendants ORDER BY pid",
        )?;
        let pids = stmt
            .query_map([root.to_string()], |row| pid_column(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pids)
    }

    pub fn id_for_root_concept(&self) -> Result<Pid> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let root = conn
            .query_row(
                "SELECT pid FROM concepts WHERE prefix = ? AND name = ? AND parent_pid IS NULL",
                (ROOT_CONTEXT, ROOT_CONCEPT),
                |row| pid_column(row, 0),
            )
            .optional()?;
        root.ok_or_else(|| anyhow::anyhow!("Site is not initialised: no root concept"))
    }

    /// Label to PID of every concept defined directly in `prefix`.
    pub fn concepts_for_context(&self, prefix: &str) -> Result<BTreeMap<String, Pid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        names_for_context(&conn, "concepts", prefix)
    }

    // ============================================================
    // Instance operations
    // ============================================================

    pub fn has_instance(&self, prefix: &str, name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE prefix = ? AND name = ?",
            (prefix, name),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_instance(&self, prefix: &str, name: &str) -> Result<Option<Instance>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let instance = conn
            .query_row(
                &format!("{INSTANCE_COLUMNS} WHERE prefix = ? AND name = ?"),
                (prefix, name),
                instance_from_row,
            )
            .optional()?;
        Ok(instance)
    }

    pub fn get_instance_by_pid(&self, pid: &Pid) -> Result<Option<Instance>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let instance = conn
            .query_row(
                &format!("{INSTANCE_COLUMNS} WHERE pid = ?"),
                [pid.to_string()],
                instance_from_row,
            )
            .optional()?;
        Ok(instance)
    }

    pub fn instance_pid(&self, prefix: &str, name: &str) -> Result<Option<Pid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        named_pid(&conn, "instances", prefix, name)
    }

    /// Mint the next marker of `prefix` and store the instance `build` makes
    /// from it, in one transaction.
    pub fn create_instance<F>(&self, prefix: &str, build: F) -> Result<Instance>
    where
        F: FnOnce(u64) -> Instance,
    {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let instance = build(next_marker(&tx, prefix)?);

        tx.execute(
            "INSERT INTO instances (pid, prefix, marker, name, class_pid, state, mutability, extras, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                instance.pid.to_string(),
                &instance.prefix,
                instance.pid.marker as i64,
                &instance.name,
                instance.class.to_string(),
                &instance.state,
                instance.mutability.as_str(),
                serde_json::to_string(&instance.extras)?,
                instance.created_at.to_rfc3339(),
            ),
        )?;
        tx.commit()?;
        Ok(instance)
    }

    /// Every instance of the site, ordered by PID.
    pub fn all_instances(&self) -> Result<Vec<Instance>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!("{INSTANCE_COLUMNS} ORDER BY prefix, marker"))?;
        let instances = stmt
            .query_map([], instance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(instances)
    }

    /// Name to PID of every instance defined directly in `prefix`.
    pub fn instances_for_context(&self, prefix: &str) -> Result<BTreeMap<String, Pid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        names_for_context(&conn, "instances", prefix)
    }

    // ============================================================
    // PID lookups
    // ============================================================

    /// Existence check for a full PID, concepts first.
    ///
    /// Anything that does not parse as a PID is simply not found.
    pub fn lookup_by_full_pid(&self, raw: &str, kind: KindFilter) -> Result<Option<Resolved>> {
        let Ok(pid) = raw.parse::<Pid>() else {
            return Ok(None);
        };
        let conn = self.conn.lock().expect("database lock poisoned");
        if kind.has_concept() && pid_exists(&conn, "concepts", raw)? {
            return Ok(Some(Resolved::concept(pid)));
        }
        if kind.has_instance() && pid_exists(&conn, "instances", raw)? {
            return Ok(Some(Resolved::instance(pid)));
        }
        Ok(None)
    }

    /// Look up `<context>:<marker>:<name>`, concepts first. A marker that is
    /// not a number never matches.
    pub fn lookup_versioned(
        &self,
        context: &str,
        marker: &str,
        name: &str,
        kind: KindFilter,
    ) -> Result<Option<Resolved>> {
        let Ok(marker) = marker.parse::<u64>() else {
            return Ok(None);
        };
        let conn = self.conn.lock().expect("database lock poisoned");
        if kind.has_concept() {
            if let Some(pid) = versioned_pid(&conn, "concepts", context, marker, name)? {
                return Ok(Some(Resolved::concept(pid)));
            }
        }
        if kind.has_instance() {
            if let Some(pid) = versioned_pid(&conn, "instances", context, marker, name)? {
                return Ok(Some(Resolved::instance(pid)));
            }
        }
        Ok(None)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// `<data dir>/contextkb.db` for the current platform.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "contextkb")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("contextkb.db"))
}

const CONCEPT_COLUMNS: &str = "SELECT pid, prefix, name, parent_pid, mutability, description, state, translation, created_at FROM concepts";

const INSTANCE_COLUMNS: &str = "SELECT pid, prefix, name, class_pid, state, mutability, extras, created_at FROM instances";

fn next_marker(tx: &Transaction<'_>, prefix: &str) -> Result<u64> {
    let last: Option<i64> = tx
        .query_row(
            "SELECT last_marker FROM contexts WHERE prefix = ?",
            [prefix],
            |row| row.get(0),
        )
        .optional()?;
    let Some(last) = last else {
        return Err(KbError::ContextNotFound(prefix.to_string()).into());
    };
    let next = last + 1;
    tx.execute(
        "UPDATE contexts SET last_marker = ? WHERE prefix = ?",
        (next, prefix),
    )?;
    Ok(next as u64)
}

fn write_search_path(tx: &Transaction<'_>, prefix: &str, search_path: &[String]) -> Result<()> {
    for (position, target) in search_path.iter().enumerate() {
        tx.execute(
            "INSERT INTO context_search_paths (prefix, position, target) VALUES (?, ?, ?)",
            (prefix, position as i64, target),
        )?;
    }
    Ok(())
}

fn load_search_path(conn: &Connection, prefix: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT target FROM context_search_paths WHERE prefix = ? ORDER BY position",
    )?;
    let targets = stmt
        .query_map([prefix], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(targets)
}

fn load_properties(conn: &Connection, pid: &Pid) -> Result<PropertyBuckets> {
    let mut stmt = conn.prepare(
        "SELECT kind, name, range_kind, range FROM concept_properties WHERE concept_pid = ?",
    )?;
    let rows = stmt
        .query_map([pid.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut buckets = PropertyBuckets::default();
    for (kind, name, range_kind, range) in rows {
        let kind = PropertyKind::from_str(&kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown property kind '{kind}' on {pid}"))?;
        let range = match range_kind.as_str() {
            "object" => PropertyRange::Object(range.parse()?),
            _ => PropertyRange::Data(Datatype::parse(&range)?),
        };
        buckets.get_mut(kind).insert(name, range);
    }
    Ok(buckets)
}

fn with_properties(conn: &Connection, concept: Option<Concept>) -> Result<Option<Concept>> {
    let Some(mut concept) = concept else {
        return Ok(None);
    };
    concept.direct = load_properties(conn, &concept.pid)?;
    Ok(Some(concept))
}

fn names_for_context(conn: &Connection, table: &str, prefix: &str) -> Result<BTreeMap<String, Pid>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, pid FROM {table} WHERE prefix = ? ORDER BY name"
    ))?;
    let names = stmt
        .query_map([prefix], |row| Ok((row.get::<_, String>(0)?, pid_column(row, 1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(names)
}

fn pid_exists(conn: &Connection, table: &str, pid: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE pid = ?"),
        [pid],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn named_pid(conn: &Connection, table: &str, prefix: &str, name: &str) -> Result<Option<Pid>> {
    let pid = conn
        .query_row(
            &format!("SELECT pid FROM {table} WHERE prefix = ? AND name = ?"),
            (prefix, name),
            |row| pid_column(row, 0),
        )
        .optional()?;
    Ok(pid)
}

fn versioned_pid(
    conn: &Connection,
    table: &str,
    context: &str,
    marker: u64,
    name: &str,
) -> Result<Option<Pid>> {
    let pid = conn
        .query_row(
            &format!("SELECT pid FROM {table} WHERE prefix = ? AND marker = ? AND name = ?"),
            (context, marker as i64, name),
            |row| pid_column(row, 0),
        )
        .optional()?;
    Ok(pid)
}

fn context_from_row(row: &Row<'_>) -> rusqlite::Result<Context> {
    Ok(Context {
        prefix: row.get(0)?,
        identifier: row.get(1)?,
        title: row.get(2)?,
        owner: row.get(3)?,
        search_path: Vec::new(),
        state: ContextState::from_str(&row.get::<_, String>(4)?).unwrap_or(ContextState::New),
        mode: row
            .get::<_, Option<String>>(5)?
            .and_then(|m| AccessMode::from_str(&m)),
        last_marker: row.get::<_, i64>(6)? as u64,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn concept_from_row(row: &Row<'_>) -> rusqlite::Result<Concept> {
    let translation: String = row.get(7)?;
    Ok(Concept {
        pid: pid_column(row, 0)?,
        prefix: row.get(1)?,
        label: row.get(2)?,
        parent: match row.get::<_, Option<String>>(3)? {
            Some(_) => Some(pid_column(row, 3)?),
            None => None,
        },
        mutability: Mutability::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        description: row.get(5)?,
        state: row.get(6)?,
        translation: serde_json::from_str(&translation).unwrap_or_default(),
        direct: PropertyBuckets::default(),
        indirect: PropertyBuckets::default(),
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<Instance> {
    let extras: String = row.get(6)?;
    Ok(Instance {
        pid: pid_column(row, 0)?,
        prefix: row.get(1)?,
        name: row.get(2)?,
        class: pid_column(row, 3)?,
        state: row.get(4)?,
        mutability: Mutability::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
        extras: serde_json::from_str(&extras).unwrap_or_default(),
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn pid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Pid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_db() -> Database {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db.initialise_site("local", false).unwrap();
        db
    }

    fn lab(search_path: Vec<String>) -> Context {
        Context {
            prefix: "lab".into(),
            identifier: "local:lab".into(),
            title: "Lab".into(),
            owner: "alice".into(),
            search_path,
            state: ContextState::New,
            mode: None,
            last_marker: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn markers_are_minted_in_sequence() {
        let db = site_db();
        db.create_context(&lab(vec![ROOT_CONTEXT.into()])).unwrap();

        let root = db.id_for_root_concept().unwrap();
        let sensor = db
            .create_concept("lab", |marker| Concept {
                pid: Pid::new("local", "lab", marker, "Sensor"),
                label: "Sensor".into(),
                prefix: "lab".into(),
                parent: Some(root.clone()),
                mutability: Mutability::Mutable,
                description: String::new(),
                state: NEW_ENTRY_STATE.into(),
                translation: BTreeMap::new(),
                direct: PropertyBuckets::default(),
                indirect: PropertyBuckets::default(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(sensor.pid.marker, 1);

        let temp = db
            .create_instance("lab", |marker| Instance {
                pid: Pid::new("local", "lab", marker, "temp1"),
                name: "temp1".into(),
                prefix: "lab".into(),
                class: sensor.pid.clone(),
                state: NEW_ENTRY_STATE.into(),
                mutability: Mutability::Mutable,
                extras: serde_json::Map::new(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(temp.pid.marker, 2);
        assert_eq!(db.get_context("lab").unwrap().unwrap().last_marker, 2);
    }

    #[test]
    fn failed_insert_does_not_advance_the_marker() {
        let db = site_db();
        db.create_context(&lab(vec![])).unwrap();
        let make = |marker| Instance {
            pid: Pid::new("local", "lab", marker, "temp1"),
            name: "temp1".into(),
            prefix: "lab".into(),
            class: Pid::new("local", "kb", 0, "Concept"),
            state: NEW_ENTRY_STATE.into(),
            mutability: Mutability::Mutable,
            extras: serde_json::Map::new(),
            created_at: Utc::now(),
        };
        db.create_instance("lab", make).unwrap();
        assert!(db.create_instance("lab", make).is_err());
        assert_eq!(db.get_context("lab").unwrap().unwrap().last_marker, 1);
    }

    #[test]
    fn recreated_context_continues_from_the_retired_marker() {
        let db = site_db();
        assert_eq!(db.create_context(&lab(vec![])).unwrap(), 0);
        let make = |marker| Instance {
            pid: Pid::new("local", "lab", marker, "temp1"),
            name: "temp1".into(),
            prefix: "lab".into(),
            class: Pid::new("local", "kb", 0, "Concept"),
            state: NEW_ENTRY_STATE.into(),
            mutability: Mutability::Mutable,
            extras: serde_json::Map::new(),
            created_at: Utc::now(),
        };
        let first = db.create_instance("lab", make).unwrap();
        assert!(db.delete_context("lab").unwrap());

        assert_eq!(db.create_context(&lab(vec![])).unwrap(), 1);
        let second = db.create_instance("lab", make).unwrap();
        assert_eq!(second.pid.marker, 2);
        assert_ne!(first.pid, second.pid);

        assert!(db.delete_context("lab").unwrap());
        assert_eq!(db.create_context(&lab(vec![])).unwrap(), 2);
    }

    #[test]
    fn minting_in_unknown_context_is_context_not_found() {
        let db = site_db();
        let err = db
            .create_instance("nowhere", |_| unreachable!())
            .unwrap_err();
        assert!(matches!(
            KbError::from(err),
            KbError::ContextNotFound(p) if p == "nowhere"
        ));
    }

    #[test]
    fn unknown_stored_datatype_is_unknown_type() {
        let db = site_db();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO concept_properties (concept_pid, kind, name, range_kind, range)
                 VALUES ('local:kb:0:Concept', 'required', 'weight', 'data', 'Float')",
                [],
            )
            .unwrap();
        }
        let root = db.id_for_root_concept().unwrap();
        let err = db.get_concept_by_pid(&root).unwrap_err();
        assert!(matches!(KbError::from(err), KbError::UnknownType(t) if t == "Float"));
    }

    #[test]
    fn second_initialise_needs_reset() {
        let db = site_db();
        assert!(db.initialise_site("local", false).is_err());
        db.create_context(&lab(vec![])).unwrap();
        db.initialise_site("other", true).unwrap();
        assert_eq!(db.site().unwrap().as_deref(), Some("other"));
        assert_eq!(db.context_list().unwrap(), vec![ROOT_CONTEXT.to_string()]);
    }
}
