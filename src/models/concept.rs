use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Datatype, Pid};

/// Label of the root concept at the top of every specialisation chain.
pub const ROOT_CONCEPT: &str = "Concept";

/// State given to newly created concepts and instances.
pub const NEW_ENTRY_STATE: &str = "new";

/// A schema node: a named type with property constraints.
///
/// Properties live in three buckets (required, recommended, optional). Each
/// bucket is split into `direct` entries declared on this concept and
/// `indirect` entries copied from the parent's merged view when the concept
/// was created or loaded. Indirect entries are a snapshot: later changes to
/// the parent are not reflected until the concept is loaded again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub pid: Pid,
    pub label: String,
    pub prefix: String,
    /// `None` only for the root concept.
    pub parent: Option<Pid>,
    pub mutability: Mutability,
    pub description: String,
    pub state: String,
    pub translation: BTreeMap<String, String>,
    pub direct: PropertyBuckets,
    pub indirect: PropertyBuckets,
    pub created_at: DateTime<Utc>,
}

impl Concept {
    /// Merge the requested buckets into one map.
    ///
    /// Direct buckets are folded first, then (unless `direct_only`) indirect
    /// ones into the same map. An inherited property therefore replaces a
    /// direct property of the same name in the merged view.
    pub fn get_properties(&self, kinds: &[PropertyKind], direct_only: bool) -> PropertyMap {
        let mut merged = PropertyMap::new();
        for kind in PropertyKind::ALL {
            if kinds.contains(&kind) {
                merged.extend(self.direct.get(kind).clone());
            }
        }
        if !direct_only {
            for kind in PropertyKind::ALL {
                if kinds.contains(&kind) {
                    merged.extend(self.indirect.get(kind).clone());
                }
            }
        }
        merged
    }

    /// Snapshot the parent's merged view, bucket by bucket, into `indirect`.
    pub fn inherit_from(&mut self, parent: &Concept) {
        for kind in PropertyKind::ALL {
            *self.indirect.get_mut(kind) = parent.get_properties(&[kind], false);
        }
    }

    /// Serializable view with every bucket merged (direct and inherited).
    pub fn view(&self, root: &Pid) -> ConceptView {
        ConceptView {
            name: self.label.clone(),
            prefix: self.prefix.clone(),
            pid: self.pid.clone(),
            specialises: self.parent.clone(),
            instance_of: root.clone(),
            description: self.description.clone(),
            state: self.state.clone(),
            mutability: self.mutability,
            translation: self.translation.clone(),
            required: self.get_properties(&[PropertyKind::Required], false),
            recommended: self.get_properties(&[PropertyKind::Recommended], false),
            optional: self.get_properties(&[PropertyKind::Optional], false),
            created_at: self.created_at,
        }
    }
}

/// Which of the three buckets a property constraint belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Required,
    Recommended,
    Optional,
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 3] = [Self::Required, Self::Recommended, Self::Optional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Recommended => "recommended",
            Self::Optional => "optional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Self::Required),
            "recommended" => Some(Self::Recommended),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

/// The declared range of a property.
///
/// Serialized as a plain string: the datatype name for data properties, the
/// target concept's PID for object properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRange {
    Data(Datatype),
    Object(Pid),
}

impl fmt::Display for PropertyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(datatype) => f.write_str(datatype.as_str()),
            Self::Object(pid) => write!(f, "{pid}"),
        }
    }
}

impl Serialize for PropertyRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PropertyRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Some(datatype) = Datatype::from_name(&raw) {
            return Ok(Self::Data(datatype));
        }
        raw.parse()
            .map(Self::Object)
            .map_err(serde::de::Error::custom)
    }
}

pub type PropertyMap = BTreeMap<String, PropertyRange>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBuckets {
    pub required: PropertyMap,
    pub recommended: PropertyMap,
    pub optional: PropertyMap,
}

impl PropertyBuckets {
    pub fn get(&self, kind: PropertyKind) -> &PropertyMap {
        match kind {
            PropertyKind::Required => &self.required,
            PropertyKind::Recommended => &self.recommended,
            PropertyKind::Optional => &self.optional,
        }
    }

    pub fn get_mut(&mut self, kind: PropertyKind) -> &mut PropertyMap {
        match kind {
            PropertyKind::Required => &mut self.required,
            PropertyKind::Recommended => &mut self.recommended,
            PropertyKind::Optional => &mut self.optional,
        }
    }
}

/// Whether a concept may later be redefined or hidden.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mutability {
    #[default]
    Mutable,
    Immutable,
    NoHiding,
}

impl Mutability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mutable => "mutable",
            Self::Immutable => "immutable",
            Self::NoHiding => "no-hiding",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mutable" => Some(Self::Mutable),
            "immutable" => Some(Self::Immutable),
            "no-hiding" => Some(Self::NoHiding),
            _ => None,
        }
    }
}

/// Input for creating a new concept in the current context.
///
/// Property maps go from property name to a range as the user writes it: a
/// datatype name, the concept's own term, or another concept's identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConceptInput {
    pub term: String,
    /// Parent concept identifier. Defaults to the root concept.
    #[serde(default)]
    pub specialises: Option<String>,
    #[serde(default)]
    pub mutability: Option<Mutability>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: BTreeMap<String, String>,
    #[serde(default)]
    pub recommended: BTreeMap<String, String>,
    #[serde(default)]
    pub optional: BTreeMap<String, String>,
    #[serde(default)]
    pub translation: BTreeMap<String, String>,
}

/// A concept as returned to callers, with inherited properties merged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptView {
    pub name: String,
    pub prefix: String,
    pub pid: Pid,
    pub specialises: Option<Pid>,
    pub instance_of: Pid,
    pub description: String,
    pub state: String,
    pub mutability: Mutability,
    pub translation: BTreeMap<String, String>,
    pub required: PropertyMap,
    pub recommended: PropertyMap,
    pub optional: PropertyMap,
    pub created_at: DateTime<Utc>,
}
