use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A persistent identifier: `<site>:<context>:<marker>:<name>`.
///
/// PIDs are minted once, when a concept or instance is created, and never
/// change afterwards. The marker is the owning context's counter value at
/// creation time, so two objects in one context never share a PID even if one
/// was deleted and the name reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid {
    pub site: String,
    pub context: String,
    pub marker: u64,
    pub name: String,
}

impl Pid {
    pub fn new(
        site: impl Into<String>,
        context: impl Into<String>,
        marker: u64,
        name: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            context: context.into(),
            marker,
            name: name.into(),
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.site, self.context, self.marker, self.name)
    }
}

/// Error returned when a string is not a well-formed 4-segment PID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a full PID")]
pub struct PidParseError(pub String);

impl FromStr for Pid {
    type Err = PidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        let [site, context, marker, name] = segments.as_slice() else {
            return Err(PidParseError(s.to_string()));
        };
        let marker = marker
            .parse::<u64>()
            .map_err(|_| PidParseError(s.to_string()))?;
        Ok(Pid::new(*site, *context, marker, *name))
    }
}

impl Serialize for Pid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The shape of a user-supplied identifier, decided purely by its number of
/// `:`-separated segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier<'a> {
    /// `name`, resolved through the base context's search path.
    Bare(&'a str),
    /// `context:name`, resolved inside `context` only.
    ContextQualified { context: &'a str, name: &'a str },
    /// `context:marker:name`, an explicit versioned reference.
    VersionQualified {
        context: &'a str,
        marker: &'a str,
        name: &'a str,
    },
    /// A full 4-segment PID.
    Full(&'a str),
}

impl<'a> Identifier<'a> {
    /// Classify `raw` by segment count.
    ///
    /// Never fails. Five or more segments fall back to [`Identifier::Bare`]
    /// with the untouched input; no stored name contains `:`, so such input
    /// simply never matches.
    pub fn classify(raw: &'a str) -> Self {
        let segments: Vec<&'a str> = raw.split(':').collect();
        match segments[..] {
            [context, name] => Self::ContextQualified { context, name },
            [context, marker, name] => Self::VersionQualified {
                context,
                marker,
                name,
            },
            [_, _, _, _] => Self::Full(raw),
            _ => Self::Bare(raw),
        }
    }

    /// The local-name segment.
    pub fn name(&self) -> &'a str {
        match *self {
            Self::Bare(name) => name,
            Self::ContextQualified { name, .. } => name,
            Self::VersionQualified { name, .. } => name,
            Self::Full(raw) => raw.rsplit(':').next().unwrap_or(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_segment_count() {
        assert_eq!(Identifier::classify("Sensor"), Identifier::Bare("Sensor"));
        assert_eq!(
            Identifier::classify("lab:Sensor"),
            Identifier::ContextQualified {
                context: "lab",
                name: "Sensor"
            }
        );
        assert_eq!(
            Identifier::classify("lab:3:Sensor"),
            Identifier::VersionQualified {
                context: "lab",
                marker: "3",
                name: "Sensor"
            }
        );
        assert_eq!(
            Identifier::classify("site:lab:3:Sensor"),
            Identifier::Full("site:lab:3:Sensor")
        );
    }

    #[test]
    fn too_many_segments_fall_back_to_bare() {
        let raw = "a:b:c:d:e";
        assert_eq!(Identifier::classify(raw), Identifier::Bare(raw));
    }

    #[test]
    fn empty_segments_are_not_validated() {
        assert_eq!(
            Identifier::classify(":x"),
            Identifier::ContextQualified {
                context: "",
                name: "x"
            }
        );
        assert_eq!(Identifier::classify(""), Identifier::Bare(""));
    }

    #[test]
    fn name_returns_last_segment() {
        assert_eq!(Identifier::classify("site:lab:3:Sensor").name(), "Sensor");
        assert_eq!(Identifier::classify("lab:temp1").name(), "temp1");
    }

    #[test]
    fn pid_parses_and_displays() {
        let pid: Pid = "local:lab:2:temp1".parse().unwrap();
        assert_eq!(pid, Pid::new("local", "lab", 2, "temp1"));
        assert_eq!(pid.to_string(), "local:lab:2:temp1");
    }

    #[test]
    fn pid_rejects_partial_forms_and_bad_markers() {
        assert!("lab:temp1".parse::<Pid>().is_err());
        assert!("local:lab:two:temp1".parse::<Pid>().is_err());
    }

    #[test]
    fn pid_serializes_as_string() {
        let pid = Pid::new("local", "kb", 0, "Concept");
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"local:kb:0:Concept\"");
        let back: Pid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pid);
    }
}
