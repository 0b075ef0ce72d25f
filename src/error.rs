//! Typed failures of the knowledge base and their wire form.
//!
//! Every coded variant crosses the HTTP boundary as an [`ErrorBody`] and is
//! rebuilt on the client by [`KbError::from_wire`]. The code table in
//! [`KbError::code`] and the match in [`KbError::from_wire`] must stay in step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type KbResult<T> = Result<T, KbError>;

#[derive(Debug, Error)]
pub enum KbError {
    #[error("Context '{0}' cannot be found or access is not granted")]
    ContextNotFound(String),

    #[error("Concept '{0}' cannot be found under the current context and its search path")]
    ConceptNotFound(String),

    #[error("Instance '{0}' cannot be found")]
    InstanceNotFound(String),

    #[error("'{0}' does not exist or is not a concept")]
    NotAConcept(String),

    #[error("Context '{0}' already exists")]
    ExistingContext(String),

    #[error("Name '{name}' is already in use by {existing}")]
    NameInUse { name: String, existing: String },

    #[error("'{0}' is empty or contains inappropriate characters")]
    IdentifierWrong(String),

    #[error("No context set, {0} failed")]
    NoContextSet(String),

    #[error("The session has been closed, {0} failed")]
    ClosedSession(String),

    #[error("Writing is not permitted: {0}")]
    WritingPermissionDenied(String),

    #[error("The type '{0}' is not recognised")]
    UnknownType(String),

    #[error("User '{0}' is already logged in")]
    AlreadyLoggedIn(String),

    #[error("Session '{0}' is not the open session")]
    InvalidSession(String),

    #[error("Property '{property}' is not declared on {class}")]
    NamePropertyDoesNotExist { property: String, class: String },

    #[error("Property '{property}' has range {range}, supplied was {supplied}")]
    PropertyRangeNotMatchingType {
        property: String,
        range: String,
        supplied: String,
    },

    /// A failure reported by a remote server with a code this build does not know.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error(transparent)]
    Storage(anyhow::Error),
}

/// Storage code may raise a coded error through `anyhow`; it is unwrapped
/// here so the code survives the trip.
impl From<anyhow::Error> for KbError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<KbError>() {
            Ok(kb) => kb,
            Err(other) => Self::Storage(other),
        }
    }
}

/// JSON shape of an error at the system boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Code carried by failures that have no stable code of their own.
pub const INTERNAL_CODE: &str = "Internal";

impl KbError {
    /// Stable wire code, `None` for storage and unrecognised remote failures.
    pub fn code(&self) -> Option<&'static str> {
        Some(match self {
            Self::ContextNotFound(_) => "ContextNotFound",
            Self::ConceptNotFound(_) => "ConceptNotFound",
            Self::InstanceNotFound(_) => "InstanceNotFound",
            Self::NotAConcept(_) => "NotAConcept",
            Self::ExistingContext(_) => "ExistingContext",
            Self::NameInUse { .. } => "NameInUse",
            Self::IdentifierWrong(_) => "IdentifierWrong",
            Self::NoContextSet(_) => "NoContextSet",
            Self::ClosedSession(_) => "ClosedSession",
            Self::WritingPermissionDenied(_) => "WritingPermissionDenied",
            Self::UnknownType(_) => "UnknownType",
            Self::AlreadyLoggedIn(_) => "AlreadyLoggedIn",
            Self::InvalidSession(_) => "InvalidSession",
            Self::NamePropertyDoesNotExist { .. } => "NamePropertyDoesNotExist",
            Self::PropertyRangeNotMatchingType { .. } => "PropertyRangeNotMatchingType",
            Self::Remote { .. } | Self::Storage(_) => return None,
        })
    }

    fn args(&self) -> Vec<String> {
        match self {
            Self::ContextNotFound(a)
            | Self::ConceptNotFound(a)
            | Self::InstanceNotFound(a)
            | Self::NotAConcept(a)
            | Self::ExistingContext(a)
            | Self::IdentifierWrong(a)
            | Self::NoContextSet(a)
            | Self::ClosedSession(a)
            | Self::WritingPermissionDenied(a)
            | Self::UnknownType(a)
            | Self::AlreadyLoggedIn(a)
            | Self::InvalidSession(a) => vec![a.clone()],
            Self::NameInUse { name, existing } => vec![name.clone(), existing.clone()],
            Self::NamePropertyDoesNotExist { property, class } => {
                vec![property.clone(), class.clone()]
            }
            Self::PropertyRangeNotMatchingType {
                property,
                range,
                supplied,
            } => vec![property.clone(), range.clone(), supplied.clone()],
            Self::Remote { .. } | Self::Storage(_) => Vec::new(),
        }
    }

    /// Serialize for the wire. Storage failures keep their detail server-side.
    pub fn to_body(&self) -> ErrorBody {
        match self.code() {
            Some(code) => ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
                args: self.args(),
            },
            None => match self {
                Self::Remote { code, message } => ErrorBody {
                    code: code.clone(),
                    message: message.clone(),
                    args: Vec::new(),
                },
                _ => ErrorBody {
                    code: INTERNAL_CODE.to_string(),
                    message: "Internal server error".to_string(),
                    args: Vec::new(),
                },
            },
        }
    }

    /// Rebuild the typed error a server sent.
    pub fn from_wire(body: ErrorBody) -> Self {
        let ErrorBody {
            code,
            message,
            args,
        } = body;
        let one = |variant: fn(String) -> KbError| match args.as_slice() {
            [a] => Some(variant(a.clone())),
            _ => None,
        };
        let rebuilt = match code.as_str() {
            "ContextNotFound" => one(Self::ContextNotFound),
            "ConceptNotFound" => one(Self::ConceptNotFound),
            "InstanceNotFound" => one(Self::InstanceNotFound),
            "NotAConcept" => one(Self::NotAConcept),
            "ExistingContext" => one(Self::ExistingContext),
            "IdentifierWrong" => one(Self::IdentifierWrong),
            "NoContextSet" => one(Self::NoContextSet),
            "ClosedSession" => one(Self::ClosedSession),
            "WritingPermissionDenied" => one(Self::WritingPermissionDenied),
            "UnknownType" => one(Self::UnknownType),
            "AlreadyLoggedIn" => one(Self::AlreadyLoggedIn),
            "InvalidSession" => one(Self::InvalidSession),
            "NameInUse" => match args.as_slice() {
                [name, existing] => Some(Self::NameInUse {
                    name: name.clone(),
                    existing: existing.clone(),
                }),
                _ => None,
            },
            "NamePropertyDoesNotExist" => match args.as_slice() {
                [property, class] => Some(Self::NamePropertyDoesNotExist {
                    property: property.clone(),
                    class: class.clone(),
                }),
                _ => None,
            },
            "PropertyRangeNotMatchingType" => match args.as_slice() {
                [property, range, supplied] => Some(Self::PropertyRangeNotMatchingType {
                    property: property.clone(),
                    range: range.clone(),
                    supplied: supplied.clone(),
                }),
                _ => None,
            },
            _ => None,
        };
        rebuilt.unwrap_or(Self::Remote { code, message })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContextNotFound(_) | Self::ConceptNotFound(_) | Self::InstanceNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn every_coded_error() -> Vec<KbError> {
        vec![
            KbError::ContextNotFound("lab".into()),
            KbError::ConceptNotFound("Sensor".into()),
            KbError::InstanceNotFound("lab:temp1".into()),
            KbError::NotAConcept("Nothing".into()),
            KbError::ExistingContext("lab".into()),
            KbError::NameInUse {
                name: "Sensor".into(),
                existing: "local:lab:1:Sensor".into(),
            },
            KbError::IdentifierWrong("2lab".into()),
            KbError::NoContextSet("new_concept".into()),
            KbError::ClosedSession("status".into()),
            KbError::WritingPermissionDenied("new_concept".into()),
            KbError::UnknownType("Float".into()),
            KbError::AlreadyLoggedIn("alice".into()),
            KbError::InvalidSession("abc".into()),
            KbError::NamePropertyDoesNotExist {
                property: "colour".into(),
                class: "local:lab:1:Sensor".into(),
            },
            KbError::PropertyRangeNotMatchingType {
                property: "unit".into(),
                range: "String".into(),
                supplied: "3".into(),
            },
        ]
    }

    #[test]
    fn every_code_round_trips() {
        for err in every_coded_error() {
            let body = err.to_body();
            let rebuilt = KbError::from_wire(body.clone());
            assert_eq!(rebuilt.code(), err.code(), "code for {err}");
            assert_eq!(rebuilt.to_string(), err.to_string());
            assert_eq!(rebuilt.to_body(), body);
        }
    }

    #[test]
    fn codes_are_unique() {
        let errors = every_coded_error();
        let codes: HashSet<_> = errors.iter().filter_map(KbError::code).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn unknown_code_becomes_remote() {
        let err = KbError::from_wire(ErrorBody {
            code: "Exploded".into(),
            message: "boom".into(),
            args: vec![],
        });
        assert!(matches!(err, KbError::Remote { ref code, .. } if code == "Exploded"));
        assert!(err.code().is_none());
    }

    #[test]
    fn wrong_arity_becomes_remote() {
        let err = KbError::from_wire(ErrorBody {
            code: "NameInUse".into(),
            message: "dup".into(),
            args: vec!["only-one".into()],
        });
        assert!(matches!(err, KbError::Remote { .. }));
    }

    #[test]
    fn coded_errors_survive_anyhow() {
        let wrapped = anyhow::Error::from(KbError::UnknownType("Float".into()));
        let err = KbError::from(wrapped);
        assert!(matches!(err, KbError::UnknownType(t) if t == "Float"));
    }

    #[test]
    fn storage_errors_are_sanitised() {
        let body = KbError::Storage(anyhow::anyhow!("disk on fire")).to_body();
        assert_eq!(body.code, INTERNAL_CODE);
        assert!(!body.message.contains("disk"));
    }
}
