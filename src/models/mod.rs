//! Domain models for contextkb.
//!
//! # Core Concepts
//!
//! - [`Pid`]: the immutable `<site>:<context>:<marker>:<name>` identifier of
//!   every concept and instance, and [`Identifier`], the classification of the
//!   shorter forms users type.
//! - [`Context`]: a namespace with an ordered search path. Bare names are
//!   resolved breadth-first along search paths.
//! - [`Concept`]: a schema node whose property constraints are inherited from
//!   its single parent.
//! - [`Instance`]: a data node of one concept.
//!
//! Inputs for the mutating operations are the `Create*Input` structs; the
//! read side returns [`ConceptView`], [`Instance`] or the [`Entry`] union.

mod concept;
mod context;
mod datatype;
mod entry;
mod instance;
pub mod naming;
mod pid;

pub use concept::*;
pub use context::*;
pub use datatype::*;
pub use entry::*;
pub use instance::*;
pub use pid::*;
