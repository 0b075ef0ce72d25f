use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Pid;

/// Prefix of the root context every site is initialised with.
pub const ROOT_CONTEXT: &str = "kb";

/// A namespace holding concepts and instances.
///
/// Bare names are resolved against a context and then, breadth-first, against
/// the contexts named in its `search_path`. `last_marker` numbers every
/// concept and instance created inside the context; it only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub prefix: String,
    /// `<site>:<prefix>`, the first two segments of every PID minted here.
    pub identifier: String,
    pub title: String,
    pub owner: String,
    pub search_path: Vec<String>,
    pub state: ContextState,
    /// Set only while a session has this context as its current context.
    pub mode: Option<AccessMode>,
    pub last_marker: u64,
    pub created_at: DateTime<Utc>,
}

impl Context {
    /// `New` becomes `Active` on first entry; other states are kept.
    pub fn activate(&mut self) {
        if self.state == ContextState::New {
            self.state = ContextState::Active;
        }
    }

    /// Irreversibly write-lock the context.
    pub fn freeze(&mut self) {
        self.state = ContextState::Frozen;
        self.mode = Some(AccessMode::Read);
    }
}

/// The lifecycle state of a context.
///
/// - `New`: created, never entered
/// - `Active`: entered at least once
/// - `Frozen`: permanently read-only
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    New,
    Active,
    Frozen,
}

impl ContextState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Frozen => "frozen",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "active" => Some(Self::Active),
            "frozen" => Some(Self::Frozen),
            _ => None,
        }
    }
}

/// How the session holds its current context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[serde(alias = "R")]
    Read,
    #[serde(alias = "W")]
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" | "R" => Some(Self::Read),
            "write" | "W" => Some(Self::Write),
            _ => None,
        }
    }
}

/// Input for creating a new context.
///
/// Omitted fields are filled in by the session: the owner defaults to the
/// logged-in user and the search path to the current context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContextInput {
    pub prefix: String,
    pub title: Option<String>,
    pub search_path: Option<Vec<String>>,
    pub owner: Option<String>,
}

/// Input for entering a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterContextInput {
    pub prefix: String,
    pub mode: AccessMode,
}

/// The current context's search path, read or replaced as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPath {
    pub search_path: Vec<String>,
}

/// A context together with the names it defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStatus {
    pub title: String,
    pub prefix: String,
    pub identifier: String,
    pub search_path: Vec<String>,
    pub owner: String,
    pub mode: Option<AccessMode>,
    pub state: ContextState,
    pub last_marker: u64,
    pub concepts: BTreeMap<String, Pid>,
    pub instances: BTreeMap<String, Pid>,
}
