//! Rule matching primitives.
//!
//! - [`CommandMatcher`] - tests a command line against a command group
//! - [`ScopeResolver`] - tests a `(user, asset, account)` triple against a rule's scopes
//!
//! Both are cheap borrowed views over the engine's caches and collaborators,
//! built per evaluation. Neither ever returns an error: data problems make
//! the affected item or selector not match.

pub mod command;
pub mod scope;

pub use command::{exact_match, CommandMatcher};
pub use scope::ScopeResolver;
