//! An in-memory I/O driver.
//!
//! [`MemoryDriver`] records every raw call it receives instead of touching
//! the network, and can be told to complete, hang, or fail those calls.
//! Hanging drivers are how cancellation paths get exercised; the recorded
//! parameter structs are how tests assert an endpoint dialed exactly what
//! it was configured with.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use berth_core::{
    Address, AddressFamily, DisconnectReason, EndpointError, EndpointResult, IoDriver,
    ListeningPort, ProcessConfig, ProcessEventHandler, ProcessHandle, Protocol,
    ProtocolCapabilities, ProtocolFactory, StreamConnectParams, StreamListenParams,
    TlsConnectParams, TlsListenParams, Transport, UnixConnectParams, UnixListenParams,
};

/// How the driver resolves each raw call.
#[derive(Debug, Clone)]
pub enum MemoryBehavior {
    /// Complete immediately: build the protocol, deliver the connection.
    Complete,
    /// Never complete. The call is still recorded.
    Hang,
    /// Fail with the given error after recording the call.
    Fail(EndpointError),
}

/// Everything a [`MemoryDriver`] has been asked to do.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Recorded `connect_stream` calls.
    pub stream_connects: Vec<StreamConnectParams>,
    /// Recorded `connect_tls` calls.
    pub tls_connects: Vec<TlsConnectParams>,
    /// Recorded `connect_unix` calls.
    pub unix_connects: Vec<UnixConnectParams>,
    /// Recorded `listen_stream` calls.
    pub stream_listens: Vec<StreamListenParams>,
    /// Recorded `listen_tls` calls.
    pub tls_listens: Vec<TlsListenParams>,
    /// Recorded `listen_unix` calls.
    pub unix_listens: Vec<UnixListenParams>,
    /// Number of `listen_stdio` calls.
    pub stdio_listens: usize,
    /// Recorded `adopt_stream_port` calls.
    pub adopted_ports: Vec<(RawFd, AddressFamily)>,
    /// Recorded `spawn_process` configurations.
    pub spawned: Vec<ProcessConfig>,
    /// Protocols built for completed connects, in connection order.
    pub connected_protocols: Vec<Box<dyn Protocol>>,
    /// Transports handed to those protocols.
    pub transports: Vec<Arc<MemoryTransport>>,
    /// Event handlers for completed spawns; drive them to simulate child
    /// process activity.
    pub process_handlers: Vec<Box<dyn ProcessEventHandler>>,
    /// Handles given to the spawned handlers.
    pub process_handles: Vec<Arc<MemoryProcessHandle>>,
}

/// An [`IoDriver`] that performs no I/O.
#[derive(Debug)]
pub struct MemoryDriver {
    connect: MemoryBehavior,
    listen: MemoryBehavior,
    spawn: MemoryBehavior,
    state: StdMutex<MemoryState>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// A driver that completes every call immediately.
    pub fn new() -> Self {
        Self::with_behavior(MemoryBehavior::Complete)
    }

    /// A driver whose calls never complete.
    pub fn hanging() -> Self {
        Self::with_behavior(MemoryBehavior::Hang)
    }

    /// A driver whose calls fail with `error`.
    pub fn failing(error: EndpointError) -> Self {
        Self::with_behavior(MemoryBehavior::Fail(error))
    }

    fn with_behavior(behavior: MemoryBehavior) -> Self {
        Self {
            connect: behavior.clone(),
            listen: behavior.clone(),
            spawn: behavior,
            state: StdMutex::new(MemoryState::default()),
        }
    }

    /// The recorded call log.
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory driver mutex poisoned")
    }

    async fn complete_connect(
        &self,
        peer: Address,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()> {
        match &self.connect {
            MemoryBehavior::Complete => {
                let transport = Arc::new(MemoryTransport::new(peer.clone()));
                let mut protocol = factory.build_protocol(&peer)?;
                protocol.connection_made(Arc::clone(&transport) as Arc<dyn Transport>);
                let mut state = self.state();
                state.transports.push(transport);
                state.connected_protocols.push(protocol);
                Ok(())
            }
            MemoryBehavior::Hang => {
                futures::future::pending().await
            }
            MemoryBehavior::Fail(error) => Err(error.clone()),
        }
    }

    async fn complete_listen(
        &self,
        address: Address,
        _factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        match &self.listen {
            MemoryBehavior::Complete => {
                Ok(Box::new(MemoryListeningPort::new(address)) as Box<dyn ListeningPort>)
            }
            MemoryBehavior::Hang => {
                futures::future::pending().await
            }
            MemoryBehavior::Fail(error) => Err(error.clone()),
        }
    }
}

fn listen_address(params: &StreamListenParams) -> Address {
    let host = if params.interface.is_empty() {
        match params.family {
            AddressFamily::Inet6 => "::".to_string(),
            _ => "0.0.0.0".to_string(),
        }
    } else {
        params.interface.clone()
    };
    Address::HostPort {
        host,
        port: params.port,
    }
}

#[async_trait]
impl IoDriver for MemoryDriver {
    async fn connect_stream(
        &self,
        params: StreamConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()> {
        trace!(addr = %params.addr, "memory stream connect");
        let peer = Address::Tcp(params.addr);
        self.state().stream_connects.push(params);
        self.complete_connect(peer, factory).await
    }

    async fn connect_tls(
        &self,
        params: TlsConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()> {
        let peer = Address::Tcp(params.stream.addr);
        self.state().tls_connects.push(params);
        self.complete_connect(peer, factory).await
    }

    async fn connect_unix(
        &self,
        params: UnixConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()> {
        let peer = Address::Unix(params.path.clone());
        self.state().unix_connects.push(params);
        self.complete_connect(peer, factory).await
    }

    async fn listen_stream(
        &self,
        params: StreamListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        let address = listen_address(&params);
        self.state().stream_listens.push(params);
        self.complete_listen(address, factory).await
    }

    async fn listen_tls(
        &self,
        params: TlsListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        let address = listen_address(&params.stream);
        self.state().tls_listens.push(params);
        self.complete_listen(address, factory).await
    }

    async fn listen_unix(
        &self,
        params: UnixListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        let address = Address::Unix(params.path.clone());
        self.state().unix_listens.push(params);
        self.complete_listen(address, factory).await
    }

    async fn listen_stdio(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        self.state().stdio_listens += 1;
        self.complete_listen(Address::Stdio, factory).await
    }

    async fn adopt_stream_port(
        &self,
        fd: RawFd,
        family: AddressFamily,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>> {
        self.state().adopted_ports.push((fd, family));
        self.complete_listen(Address::Fd(fd), factory).await
    }

    async fn spawn_process(
        &self,
        config: ProcessConfig,
        mut handler: Box<dyn ProcessEventHandler>,
    ) -> EndpointResult<()> {
        self.state().spawned.push(config);
        match &self.spawn {
            MemoryBehavior::Complete => {
                let handle = Arc::new(MemoryProcessHandle::new(Some(42)));
                handler.process_started(Arc::clone(&handle) as Arc<dyn ProcessHandle>);
                let mut state = self.state();
                state.process_handles.push(handle);
                state.process_handlers.push(handler);
                Ok(())
            }
            MemoryBehavior::Hang => {
                futures::future::pending().await
            }
            MemoryBehavior::Fail(error) => Err(error.clone()),
        }
    }
}

/// The transport a [`MemoryDriver`] hands to completed connections.
#[derive(Debug)]
pub struct MemoryTransport {
    peer: Address,
    /// Chunks written to the peer.
    pub writes: StdMutex<Vec<Bytes>>,
    /// Whether `close` was called.
    pub closed: AtomicBool,
    /// Whether `close_write` was called.
    pub write_closed: AtomicBool,
}

impl MemoryTransport {
    /// A transport connected to `peer`.
    pub fn new(peer: Address) -> Self {
        Self {
            peer,
            writes: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            write_closed: AtomicBool::new(false),
        }
    }
}

impl Transport for MemoryTransport {
    fn write(&self, data: Bytes) {
        self.writes
            .lock()
            .expect("memory transport mutex poisoned")
            .push(data);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn close_write(&self) {
        self.write_closed.store(true, Ordering::SeqCst);
    }

    fn peer_address(&self) -> Address {
        self.peer.clone()
    }

    fn local_address(&self) -> Address {
        self.peer.clone()
    }
}

/// The port a [`MemoryDriver`] returns from completed listens.
#[derive(Debug)]
pub struct MemoryListeningPort {
    address: Address,
    /// Whether `stop` was called.
    pub stopped: AtomicBool,
}

impl MemoryListeningPort {
    /// A port bound to `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            stopped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ListeningPort for MemoryListeningPort {
    fn local_address(&self) -> Address {
        self.address.clone()
    }

    async fn stop(&self) -> EndpointResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The child-process handle a [`MemoryDriver`] gives spawned handlers.
#[derive(Debug)]
pub struct MemoryProcessHandle {
    pid: Option<u32>,
    /// Chunks written to the child's stdin.
    pub stdin: StdMutex<Vec<Bytes>>,
    /// Whether stdin was closed.
    pub stdin_closed: AtomicBool,
    /// Whether the child was killed.
    pub killed: AtomicBool,
}

impl MemoryProcessHandle {
    /// A handle for a child with the given pid.
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            stdin: StdMutex::new(Vec::new()),
            stdin_closed: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }
}

impl ProcessHandle for MemoryProcessHandle {
    fn write_stdin(&self, data: Bytes) {
        self.stdin
            .lock()
            .expect("memory process mutex poisoned")
            .push(data);
    }

    fn close_stdin(&self) {
        self.stdin_closed.store(true, Ordering::SeqCst);
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// What a [`MemoryProtocol`] has seen, shared with the test that built it.
#[derive(Debug, Default)]
pub struct MemoryProtocolRecord {
    /// Whether `connection_made` was delivered.
    pub connected: AtomicBool,
    /// Data chunks received.
    pub data: StdMutex<Vec<Bytes>>,
    /// The disconnect reason, once the connection is lost.
    pub lost: StdMutex<Option<DisconnectReason>>,
}

/// A recording protocol for endpoint tests.
#[derive(Debug)]
pub struct MemoryProtocol {
    capabilities: ProtocolCapabilities,
    record: Arc<MemoryProtocolRecord>,
}

impl Protocol for MemoryProtocol {
    fn connection_made(&mut self, _transport: Arc<dyn Transport>) {
        self.record.connected.store(true, Ordering::SeqCst);
    }

    fn data_received(&mut self, data: Bytes) {
        self.record
            .data
            .lock()
            .expect("memory protocol mutex poisoned")
            .push(data);
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        *self
            .record
            .lost
            .lock()
            .expect("memory protocol mutex poisoned") = Some(reason);
    }

    fn capabilities(&self) -> ProtocolCapabilities {
        self.capabilities
    }
}

/// Builds [`MemoryProtocol`]s that all report into one shared record.
#[derive(Debug, Default)]
pub struct MemoryProtocolFactory {
    capabilities: ProtocolCapabilities,
    record: Arc<MemoryProtocolRecord>,
    fail: Option<String>,
}

impl MemoryProtocolFactory {
    /// A factory building protocols with no optional capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory building protocols that declare `capabilities`.
    pub fn with_capabilities(capabilities: ProtocolCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// A factory whose `build_protocol` always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail: Some(message.into()),
            ..Self::default()
        }
    }

    /// The record the built protocols report into.
    pub fn record(&self) -> Arc<MemoryProtocolRecord> {
        Arc::clone(&self.record)
    }
}

impl ProtocolFactory for MemoryProtocolFactory {
    fn build_protocol(&self, _peer: &Address) -> EndpointResult<Box<dyn Protocol>> {
        match &self.fail {
            Some(message) => Err(EndpointError::ProtocolBuild(message.clone())),
            None => Ok(Box::new(MemoryProtocol {
                capabilities: self.capabilities,
                record: Arc::clone(&self.record),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completing_connect_builds_and_connects_protocol() {
        let driver = MemoryDriver::new();
        let factory = MemoryProtocolFactory::new();
        let record = factory.record();
        let params = StreamConnectParams {
            addr: "127.0.0.1:80".parse().unwrap(),
            timeout: std::time::Duration::from_secs(30),
            bind_address: None,
        };
        driver
            .connect_stream(params.clone(), Box::new(factory))
            .await
            .unwrap();
        assert_eq!(driver.state().stream_connects, vec![params]);
        assert!(record.connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_driver_reports_error() {
        let driver = MemoryDriver::failing(EndpointError::Connect("refused".into()));
        let err = driver
            .connect_stream(
                StreamConnectParams {
                    addr: "127.0.0.1:80".parse().unwrap(),
                    timeout: std::time::Duration::from_secs(30),
                    bind_address: None,
                },
                Box::new(MemoryProtocolFactory::new()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, EndpointError::Connect("refused".into()));
        // The attempt is still recorded.
        assert_eq!(driver.state().stream_connects.len(), 1);
    }

    #[tokio::test]
    async fn test_listening_port_reports_address_and_stops() {
        let driver = MemoryDriver::new();
        let port = driver
            .listen_stream(
                StreamListenParams {
                    port: 8080,
                    interface: String::new(),
                    backlog: 50,
                    family: AddressFamily::Inet,
                },
                Box::new(MemoryProtocolFactory::new()),
            )
            .await
            .unwrap();
        assert_eq!(
            port.local_address(),
            Address::HostPort {
                host: "0.0.0.0".into(),
                port: 8080
            }
        );
        port.stop().await.unwrap();
    }
}
