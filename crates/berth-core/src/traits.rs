//! Core endpoint traits.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EndpointResult;
use crate::future::PendingConnection;
use crate::types::{Address, DisconnectReason, ProtocolCapabilities};

/// A connected application protocol, shared between the caller and the I/O
/// driver's event pump (std mutex - events hold the lock only briefly).
pub type SharedProtocol = Arc<StdMutex<Box<dyn Protocol>>>;

/// The connection handle a protocol talks back through.
///
/// Implementations translate these calls into the transport-specific
/// operations: socket writes, child-process stdin writes, and so on.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Writes data to the peer.
    fn write(&self, data: Bytes);

    /// Closes the connection.
    fn close(&self);

    /// Closes only the write side, if the transport can half-close.
    /// The default closes the whole connection.
    fn close_write(&self) {
        self.close();
    }

    /// Returns the address of the remote side.
    fn peer_address(&self) -> Address;

    /// Returns the address of the local side.
    fn local_address(&self) -> Address;
}

/// An application protocol driven by transport events.
///
/// The required hooks cover every transport; the provided hooks are
/// capability-gated: they are only invoked when the instance declares the
/// matching flag in [`capabilities`](Self::capabilities).
pub trait Protocol: Send + fmt::Debug {
    /// Called exactly once, when the connection is established.
    fn connection_made(&mut self, transport: Arc<dyn Transport>);

    /// Called for every chunk of data received from the peer.
    fn data_received(&mut self, data: Bytes);

    /// Called exactly once, when the connection goes away.
    fn connection_lost(&mut self, reason: DisconnectReason);

    /// Declares which optional capabilities this instance supports.
    ///
    /// Queried once per instance at wrap time.
    fn capabilities(&self) -> ProtocolCapabilities {
        ProtocolCapabilities::default()
    }

    /// The peer closed its write side. Delivered only with the
    /// `half_close` capability.
    fn read_closed(&mut self) {}

    /// Our write side was closed. Delivered only with the `half_close`
    /// capability.
    fn write_closed(&mut self) {}

    /// A file descriptor arrived over the transport. Delivered only with
    /// the `fd_passing` capability.
    fn descriptor_received(&mut self, _fd: RawFd) {}

    /// The identity string used to tag log events for this connection.
    /// Consulted only with the `logging` capability.
    fn log_prefix(&self) -> String {
        "protocol".to_string()
    }
}

/// Builds one protocol instance per established connection.
pub trait ProtocolFactory: Send + Sync + fmt::Debug {
    /// Constructs the protocol that will handle a connection to `peer`.
    ///
    /// Failures are caught by the wrapping layer and reported through the
    /// pending connection future rather than escaping into the I/O driver.
    fn build_protocol(&self, peer: &Address) -> EndpointResult<Box<dyn Protocol>>;
}

/// An active listening socket (or pseudo-socket) produced by a server
/// endpoint.
#[async_trait]
pub trait ListeningPort: Send + Sync + fmt::Debug {
    /// The local address the port is bound to.
    fn local_address(&self) -> Address;

    /// Stops accepting connections and releases the underlying resource.
    async fn stop(&self) -> EndpointResult<()>;
}

/// An endpoint that dials a single outbound connection per `connect` call.
pub trait ClientEndpoint: Send + Sync + fmt::Debug {
    /// Starts one connection attempt and returns its pending future.
    ///
    /// The future fulfills with the protocol the factory built, fails with
    /// the dial error, or fails with
    /// [`ConnectingCancelled`](crate::EndpointError::ConnectingCancelled)
    /// when cancelled first. It never raises synchronously.
    fn connect(&self, factory: Box<dyn ProtocolFactory>) -> PendingConnection<SharedProtocol>;
}

/// An endpoint that listens for inbound connections.
pub trait ServerEndpoint: Send + Sync + fmt::Debug {
    /// Starts listening and returns a future of the bound port.
    ///
    /// Bind and listen failures are delivered through the future, never
    /// raised synchronously.
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>>;
}
