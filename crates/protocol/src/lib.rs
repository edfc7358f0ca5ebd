//! Descriptor types for language runtimes and their sessions.
//!
//! This crate contains the serde-serializable types exchanged between the
//! session manager and the providers that discover runtimes and host sessions.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization and small predicates
//! * Immutable once created: runtimes at discovery, sessions at start
//! * Stable: Changes only when the provider contract changes
//!
//! Lifecycle orchestration is built on top of these types in `rsm-runtime`.

pub mod runtime;
pub mod session;
pub mod state;

pub use runtime::*;
pub use session::*;
pub use state::*;
