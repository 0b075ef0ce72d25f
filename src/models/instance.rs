use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Mutability, Pid};

/// A data node of exactly one concept, owned by exactly one context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub pid: Pid,
    pub name: String,
    pub prefix: String,
    /// PID of the concept this instance is of.
    #[serde(rename = "instance_of")]
    pub class: Pid,
    pub state: String,
    pub mutability: Mutability,
    #[serde(default)]
    pub extras: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Value of a field usable in a `find` equality test.
    ///
    /// `pid`, `prefix`, `name` and `state` read the record itself; any other
    /// field is looked up among the extras.
    pub fn field(&self, field: &str) -> Option<Value> {
        match field {
            "pid" => Some(Value::String(self.pid.to_string())),
            "prefix" => Some(Value::String(self.prefix.clone())),
            "name" => Some(Value::String(self.name.clone())),
            "state" => Some(Value::String(self.state.clone())),
            other => self.extras.get(other).cloned(),
        }
    }
}

/// Input for creating a new instance in the current context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceInput {
    /// Concept identifier: bare, qualified or a full PID.
    pub class: String,
    pub name: String,
    #[serde(default)]
    pub extras: Map<String, Value>,
    #[serde(default)]
    pub mutability: Option<Mutability>,
}
