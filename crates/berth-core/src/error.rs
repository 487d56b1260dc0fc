//! Endpoint error types.

use thiserror::Error;

use crate::types::Address;

/// A specialized `Result` type for endpoint operations.
pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Represents errors that can occur while describing, constructing, or
/// using endpoints.
///
/// Parse errors are returned synchronously from the string entry points;
/// everything that happens after an endpoint has been constructed (dial,
/// listen, spawn, cancellation) is delivered only through the failure
/// channel of the returned [`PendingConnection`](crate::PendingConnection).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EndpointError {
    /// A malformed endpoint description string.
    #[error("{0}")]
    Parse(String),

    /// A description string named a type tag nobody recognizes.
    ///
    /// The display text is part of the compatible CLI surface and must not
    /// be reworded.
    #[error("Unknown endpoint type: '{0}'")]
    UnknownEndpointType(String),

    /// An outbound connection attempt failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Binding or listening failed, e.g. the address is already in use.
    #[error("Cannot listen: {0}")]
    CannotListen(String),

    /// A connection attempt was cancelled before it completed.
    #[error("Connection to {address} was cancelled")]
    ConnectingCancelled {
        /// The address the cancelled attempt was directed at.
        address: Address,
    },

    /// A single-use endpoint was asked to listen a second time.
    #[error("Already listened on this endpoint")]
    AlreadyListened,

    /// The child process for a process endpoint failed to start.
    #[error("Failed to spawn child process: {0}")]
    ProcessSpawn(String),

    /// The application factory failed to construct its protocol.
    #[error("Protocol construction failed: {0}")]
    ProtocolBuild(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EndpointError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
