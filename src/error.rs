//! # Structured Error Handling
//!
//! Central error type for the collector runtime. Routine failures are never
//! represented here: they are caught by the callback wrapper and downgraded to
//! a [`Status`](crate::status::Status) so that one broken collection routine
//! cannot take the scheduler down with it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    /// Invalid runtime configuration (environment overrides, intervals, pool sizes).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller passed arguments that violate the registration contract,
    /// e.g. a callback interval below one second.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// The transport collaborator failed to deliver a payload.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The mandatory startup handshake with the controller failed. This is
    /// fatal: no routine can run without a known activation configuration.
    #[error("Startup handshake failed: {0}")]
    Startup(String),

    /// Two independent contributors reported conflicting data for the same
    /// endpoint identifier. A contract violation, not a health condition.
    #[error("Endpoint merge conflict: {0}")]
    EndpointConflict(String),

    /// A payload failed validation before send (metric line limits,
    /// malformed platform event).
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
