use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConceptView, Instance, Pid};

/// Which kinds of object a resolution may return.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KindFilter {
    Concept,
    Instance,
    #[default]
    Both,
}

impl KindFilter {
    pub fn has_concept(&self) -> bool {
        matches!(self, Self::Concept | Self::Both)
    }

    pub fn has_instance(&self) -> bool {
        matches!(self, Self::Instance | Self::Both)
    }
}

/// The kind of object a PID was found to denote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Concept,
    Instance,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::Instance => "instance",
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub pid: Pid,
    pub kind: EntryKind,
}

impl Resolved {
    pub fn concept(pid: Pid) -> Self {
        Self {
            pid,
            kind: EntryKind::Concept,
        }
    }

    pub fn instance(pid: Pid) -> Self {
        Self {
            pid,
            kind: EntryKind::Instance,
        }
    }
}

/// Either kind of object, as returned by `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Concept(ConceptView),
    Instance(Instance),
}

impl Entry {
    pub fn pid(&self) -> &Pid {
        match self {
            Self::Concept(view) => &view.pid,
            Self::Instance(instance) => &instance.pid,
        }
    }
}

/// A conjunctive filter over instances.
///
/// ```json
/// {"and": [{"isa": "Sensor"}, {"equals": {"field": "unit", "value": "celsius"}}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Every sub-query must hold.
    And(Vec<Query>),
    /// Instance of the concept or of any of its descendants.
    Isa(String),
    /// Instance of exactly this concept.
    IsaExactly(String),
    Equals { field: String, value: Value },
}

/// Input for listing instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindInput {
    pub query: Query,
    #[serde(default)]
    pub pid_only: bool,
    /// Project each instance onto these fields.
    #[serde(default)]
    pub only_these: Option<Vec<String>>,
}

/// Result of `find`: PIDs when `pid_only` was asked for without a projection,
/// otherwise serialized instances (possibly projected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindOutput {
    Pids(Vec<Pid>),
    Entries(Vec<Value>),
}

impl FindOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Pids(pids) => pids.len(),
            Self::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned when a concept or instance is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub pid: Pid,
}

/// Session-level status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStatus {
    pub session_id: String,
    pub site: String,
    pub username: String,
    pub current_context: Option<String>,
    pub contexts_available: Vec<String>,
}

/// Input for opening a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpenInput {
    pub user: String,
    /// Reuse a session id handed out earlier; a fresh one is minted otherwise.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Returned by a successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpened {
    pub session_id: String,
    pub current_context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_tree_deserializes() {
        let raw = json!({
            "and": [
                {"isa": "Sensor"},
                {"equals": {"field": "unit", "value": "celsius"}}
            ]
        });
        let query: Query = serde_json::from_value(raw).unwrap();
        assert_eq!(
            query,
            Query::And(vec![
                Query::Isa("Sensor".into()),
                Query::Equals {
                    field: "unit".into(),
                    value: json!("celsius")
                },
            ])
        );
    }

    #[test]
    fn kind_filter_membership() {
        assert!(KindFilter::Both.has_concept() && KindFilter::Both.has_instance());
        assert!(!KindFilter::Concept.has_instance());
        assert!(!KindFilter::Instance.has_concept());
    }
}
