//! Error kinds shared by the administrative surface of the crate.
//!
//! Request handling never lets these escape past the listener: a failure
//! while serving a request is turned into an HTTP status code inline (see
//! [`crate::pipeline`]). These variants are for the operations exposed on
//! [`crate::instance::Instance`] and [`crate::manager::HostRegistry`].

use thiserror::Error;

/// The result type used throughout the administrative surface.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic error kinds for administrative operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing, empty, out of range, or a stump
    /// name collided with an existing one.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stump id or instance id was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was attempted on a disposed instance or listener.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The upstream relay could not reach or read from the upstream host.
    ///
    /// This variant is only constructed internally by [`crate::relay`]; the
    /// pipeline turns it into a `502` response rather than ever returning
    /// it to an administrative caller.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// The data-access collaborator failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}
