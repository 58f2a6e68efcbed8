//! Taskflow Analytics service.
//!
//! Answers "how many completed and pending todos does this user have" over HTTP and
//! keeps the answers cached, clearing a user's entry whenever the todo service publishes
//! a change event for them.
//!
//! The binary in `main.rs` loads [`config::Config`] from the environment and runs
//! [`lifecycle::Application`].

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

/// Environment configuration
pub mod config;

/// Degraded stand-ins for unusable collaborator settings
pub mod fallback;

/// Startup wiring and graceful shutdown
pub mod lifecycle;

pub use config::Config;
pub use lifecycle::Application;
