#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Danger zone matching.
//!
//! [`MatchEngine`] answers "which zones contain this position" from the
//! cached snapshot (falling back to the store), then hands the result to an
//! [`AuditRecorder`] on a detached task that persists the check, records
//! each match, and enqueues one webhook event per recorded match.

pub mod audit;
pub mod engine;

pub use audit::{AuditRecorder, AuditReport};
pub use engine::{Evaluation, MatchEngine};

use std::time::Duration;

use geocore_database::DbError;

/// Default deadline for the side-effect task of one location check.
pub const DEFAULT_SIDE_EFFECT_DEADLINE: Duration = Duration::from_secs(10);

/// Errors surfaced on the synchronous match path.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The authoritative incident list could not be read.
    #[error("Failed to load active incidents: {0}")]
    Store(#[from] DbError),

    /// The request was rejected before any I/O.
    #[error("Invalid location check: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },
}
