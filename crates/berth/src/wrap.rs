//! The connection-wrapping layer.
//!
//! Every protocol built through an endpoint is wrapped before the I/O
//! driver sees it. The wrapper fulfills the pending connection future at
//! `connection_made` time, and gates the optional transport events behind
//! the capabilities the instance declared when it was wrapped.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tracing::debug;

use berth_core::{
    Address, Completion, DisconnectReason, EndpointError, EndpointResult, Protocol,
    ProtocolCapabilities, ProtocolFactory, SharedProtocol, Transport,
};

/// Wraps a client factory so that the first established connection settles
/// `completion` and factory failures fail it instead of escaping into the
/// driver.
#[derive(Debug)]
pub struct WrappedClientFactory {
    inner: Box<dyn ProtocolFactory>,
    completion: Completion<SharedProtocol>,
}

impl WrappedClientFactory {
    /// Wraps `inner`, tying the protocols it builds to `completion`.
    pub fn new(inner: Box<dyn ProtocolFactory>, completion: Completion<SharedProtocol>) -> Self {
        Self { inner, completion }
    }
}

impl ProtocolFactory for WrappedClientFactory {
    fn build_protocol(&self, peer: &Address) -> EndpointResult<Box<dyn Protocol>> {
        match self.inner.build_protocol(peer) {
            Ok(protocol) => Ok(Box::new(WrappedProtocol::new(
                protocol,
                Some(self.completion.clone()),
            ))),
            Err(e) => {
                let error = EndpointError::ProtocolBuild(e.to_string());
                self.completion.fail(error.clone());
                Err(error)
            }
        }
    }
}

/// Wraps a server factory: accepted connections get the capability gating
/// but no future to settle.
#[derive(Debug)]
pub struct WrappedServerFactory {
    inner: Box<dyn ProtocolFactory>,
}

impl WrappedServerFactory {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn ProtocolFactory>) -> Self {
        Self { inner }
    }
}

impl ProtocolFactory for WrappedServerFactory {
    fn build_protocol(&self, peer: &Address) -> EndpointResult<Box<dyn Protocol>> {
        let protocol = self.inner.build_protocol(peer)?;
        Ok(Box::new(WrappedProtocol::new(protocol, None)))
    }
}

/// The per-connection wrapper around an application protocol.
///
/// Capabilities are queried once, at construction; changing them later has
/// no effect on this connection.
#[derive(Debug)]
pub struct WrappedProtocol {
    inner: SharedProtocol,
    capabilities: ProtocolCapabilities,
    log_prefix: String,
    transport: Option<Arc<dyn Transport>>,
    completion: Option<Completion<SharedProtocol>>,
}

impl WrappedProtocol {
    /// Wraps `inner`. With a completion handle, the wrapper fulfills it
    /// with the shared protocol once the connection is established.
    pub fn new(inner: Box<dyn Protocol>, completion: Option<Completion<SharedProtocol>>) -> Self {
        let capabilities = inner.capabilities();
        let log_prefix = if capabilities.logging {
            inner.log_prefix()
        } else {
            default_log_prefix(&*inner)
        };
        Self {
            inner: Arc::new(StdMutex::new(inner)),
            capabilities,
            log_prefix,
            transport: None,
            completion,
        }
    }

    /// The shared handle to the wrapped protocol.
    pub fn shared(&self) -> SharedProtocol {
        Arc::clone(&self.inner)
    }
}

/// A protocol without the `logging` capability still needs an identity for
/// diagnostics; the leading identifier of its debug form serves.
fn default_log_prefix(protocol: &dyn Protocol) -> String {
    let debug = format!("{protocol:?}");
    let leader: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if leader.is_empty() {
        "protocol".to_string()
    } else {
        leader
    }
}

impl Protocol for WrappedProtocol {
    fn connection_made(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(Arc::clone(&transport));
        self.inner
            .lock()
            .expect("protocol mutex poisoned")
            .connection_made(transport);
        if let Some(completion) = self.completion.take() {
            completion.fulfill(Arc::clone(&self.inner));
        }
    }

    fn data_received(&mut self, data: Bytes) {
        self.inner
            .lock()
            .expect("protocol mutex poisoned")
            .data_received(data);
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        self.inner
            .lock()
            .expect("protocol mutex poisoned")
            .connection_lost(reason);
    }

    fn capabilities(&self) -> ProtocolCapabilities {
        self.capabilities
    }

    fn read_closed(&mut self) {
        if self.capabilities.half_close {
            self.inner
                .lock()
                .expect("protocol mutex poisoned")
                .read_closed();
        } else if let Some(transport) = &self.transport {
            debug!(
                protocol = %self.log_prefix,
                "peer half-closed a connection to a protocol without half-close support; closing"
            );
            transport.close();
        }
    }

    fn write_closed(&mut self) {
        if self.capabilities.half_close {
            self.inner
                .lock()
                .expect("protocol mutex poisoned")
                .write_closed();
        }
    }

    fn descriptor_received(&mut self, fd: RawFd) {
        if self.capabilities.fd_passing {
            self.inner
                .lock()
                .expect("protocol mutex poisoned")
                .descriptor_received(fd);
        } else {
            debug!(
                protocol = %self.log_prefix,
                fd,
                "dropping file descriptor received by a protocol that does not accept them"
            );
        }
    }

    fn log_prefix(&self) -> String {
        self.log_prefix.clone()
    }
}
