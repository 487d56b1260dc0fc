//! The child-process client endpoint.
//!
//! Spawning a child and talking to it over its pipes is presented as just
//! another outbound connection: the protocol's transport writes go to the
//! child's stdin, stdout chunks arrive as received data, and process exit
//! becomes connection loss.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use berth_core::{
    Address, ClientEndpoint, Completion, DisconnectReason, EndpointError, ExitKind, IoDriver,
    PendingConnection, ProcessConfig, ProcessEventHandler, ProcessHandle, Protocol,
    ProtocolFactory, SharedProtocol, StderrBehavior, Transport,
};

use crate::wrap::WrappedProtocol;

/// Dials a child process per [`connect`](ClientEndpoint::connect) call.
#[derive(Debug, Clone)]
pub struct ProcessEndpoint {
    driver: Arc<dyn IoDriver>,
    config: ProcessConfig,
}

impl ProcessEndpoint {
    /// An endpoint spawning children per `config`.
    pub fn new(driver: Arc<dyn IoDriver>, config: ProcessConfig) -> Self {
        Self { driver, config }
    }

    /// The spawn configuration.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
}

impl ClientEndpoint for ProcessEndpoint {
    fn connect(&self, factory: Box<dyn ProtocolFactory>) -> PendingConnection<SharedProtocol> {
        let (pending, completion) = PendingConnection::new(Address::Process { pid: None });
        let adapter = ProcessProtocolAdapter {
            factory,
            completion: completion.clone(),
            stderr: self.config.stderr,
            executable: self.config.executable.clone(),
            wrapped: None,
        };
        let driver = Arc::clone(&self.driver);
        let config = self.config.clone();
        let abort = completion.cancellation();
        tokio::spawn(async move {
            debug!(executable = %config.executable.display(), "spawning child process");
            tokio::select! {
                () = abort.cancelled() => {
                    completion.fail(EndpointError::Connect("attempt aborted".into()));
                }
                result = driver.spawn_process(config, Box::new(adapter)) => {
                    if let Err(e) = result {
                        completion.fail(e);
                    }
                }
            }
        });
        pending
    }
}

/// Translates child-process lifecycle events into protocol events.
#[derive(Debug)]
struct ProcessProtocolAdapter {
    factory: Box<dyn ProtocolFactory>,
    completion: Completion<SharedProtocol>,
    stderr: StderrBehavior,
    executable: PathBuf,
    wrapped: Option<WrappedProtocol>,
}

impl ProcessEventHandler for ProcessProtocolAdapter {
    fn process_started(&mut self, process: Arc<dyn ProcessHandle>) {
        let peer = Address::Process { pid: process.pid() };
        let transport: Arc<dyn Transport> = Arc::new(ProcessTransport { process });
        match self.factory.build_protocol(&peer) {
            Ok(protocol) => {
                let mut wrapped = WrappedProtocol::new(protocol, Some(self.completion.clone()));
                wrapped.connection_made(transport);
                self.wrapped = Some(wrapped);
            }
            Err(e) => {
                self.completion
                    .fail(EndpointError::ProtocolBuild(e.to_string()));
            }
        }
    }

    fn child_data_received(&mut self, fd: u32, data: Bytes) {
        if fd == 1 {
            if let Some(wrapped) = &mut self.wrapped {
                wrapped.data_received(data);
            }
        } else {
            match self.stderr {
                StderrBehavior::Log => info!(
                    executable = %self.executable.display(),
                    fd,
                    output = %String::from_utf8_lossy(&data),
                    "child process wrote to a non-stdout descriptor"
                ),
                StderrBehavior::Drop => {}
            }
        }
    }

    fn process_ended(&mut self, exit: ExitKind) {
        match self.wrapped.take() {
            Some(mut wrapped) => wrapped.connection_lost(disconnect_reason_for_exit(&exit)),
            None => {
                let error = match exit {
                    ExitKind::SpawnFailed(message) => EndpointError::ProcessSpawn(message),
                    other => EndpointError::Connect(
                        disconnect_reason_for_exit(&other).to_string(),
                    ),
                };
                self.completion.fail(error);
            }
        }
    }
}

/// A clean zero exit is an orderly disconnect; everything else is a loss.
pub fn disconnect_reason_for_exit(exit: &ExitKind) -> DisconnectReason {
    match exit {
        ExitKind::Exited(0) => DisconnectReason::Done,
        ExitKind::Exited(code) => {
            DisconnectReason::Lost(format!("process exited with status {code}"))
        }
        ExitKind::Signaled(signal) => {
            DisconnectReason::Lost(format!("process killed by signal {signal}"))
        }
        ExitKind::SpawnFailed(message) => {
            DisconnectReason::Lost(format!("process failed to start: {message}"))
        }
    }
}

/// The transport a process-endpoint protocol talks back through.
#[derive(Debug)]
pub struct ProcessTransport {
    process: Arc<dyn ProcessHandle>,
}

impl ProcessTransport {
    /// A transport writing to `process`'s stdin.
    pub fn new(process: Arc<dyn ProcessHandle>) -> Self {
        Self { process }
    }
}

impl Transport for ProcessTransport {
    fn write(&self, data: Bytes) {
        self.process.write_stdin(data);
    }

    fn close(&self) {
        self.process.close_stdin();
    }

    fn close_write(&self) {
        self.process.close_stdin();
    }

    fn peer_address(&self) -> Address {
        Address::Process {
            pid: self.process.pid(),
        }
    }

    fn local_address(&self) -> Address {
        Address::Process {
            pid: self.process.pid(),
        }
    }
}
