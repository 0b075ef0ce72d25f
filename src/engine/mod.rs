//! The knowledge-base engine: identity resolution, the session-scoped cache,
//! and the guarded session facade every transport drives.

mod registry;
mod resolve;
mod session;

pub use registry::Registry;
pub use resolve::{not_found, Resolver};
pub use session::{Guard, Session};
