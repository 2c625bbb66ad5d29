//! `scrumai-core`: identifiers and error primitives shared by every crate.
//!
//! This crate contains no storage, messaging or provider concerns.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{ReportId, RollingTaskId, StandupId, TeamId, UserId};
