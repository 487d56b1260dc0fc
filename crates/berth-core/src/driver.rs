//! The I/O driver contract.
//!
//! The driver is the external substrate that owns sockets, readiness
//! notification, and process syscalls. Endpoints never touch it directly
//! beyond these calls; everything behind them (event loops, TLS handshakes,
//! actual spawning) lives outside this workspace.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::EndpointResult;
use crate::tls::CertificateBundle;
use crate::traits::{ListeningPort, ProtocolFactory};
use crate::types::AddressFamily;

/// Arguments for one outbound stream-socket dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConnectParams {
    /// The resolved address to dial. Name resolution happens before the
    /// driver is involved.
    pub addr: SocketAddr,
    /// Dial timeout, enforced by the driver.
    pub timeout: Duration,
    /// Optional local address to bind the outbound socket to.
    pub bind_address: Option<SocketAddr>,
}

/// Arguments for one outbound TLS dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConnectParams {
    /// The underlying stream dial.
    pub stream: StreamConnectParams,
    /// The name presented for server certificate verification.
    pub server_name: String,
    /// Client identity and trust anchors.
    pub certificates: CertificateBundle,
}

/// Arguments for one outbound Unix-socket dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixConnectParams {
    /// Path of the socket to dial.
    pub path: PathBuf,
    /// Dial timeout, enforced by the driver.
    pub timeout: Duration,
    /// Whether to verify the listener's pid lockfile before connecting.
    pub check_peer_pid: bool,
}

/// Arguments for binding a stream-socket listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamListenParams {
    /// Port to bind; 0 lets the driver pick.
    pub port: u16,
    /// Interface to bind, empty for all interfaces.
    pub interface: String,
    /// Accept-queue depth.
    pub backlog: u32,
    /// Whether this is an IPv4 or IPv6 listener.
    pub family: AddressFamily,
}

/// Arguments for binding a TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsListenParams {
    /// The underlying stream listener.
    pub stream: StreamListenParams,
    /// Server key and certificate.
    pub certificates: CertificateBundle,
}

/// Arguments for binding a Unix-socket listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixListenParams {
    /// Path to bind the socket at.
    pub path: PathBuf,
    /// Permission bits applied to the socket file.
    pub mode: u32,
    /// Accept-queue depth.
    pub backlog: u32,
    /// Whether to maintain a pid lockfile next to the socket.
    pub want_peer_pid: bool,
}

/// What a child descriptor in a [`ProcessConfig`] mapping is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildFd {
    /// A pipe the parent reads from.
    ReadPipe,
    /// A pipe the parent writes to.
    WritePipe,
    /// A duplicate of an existing parent descriptor.
    Dup(RawFd),
}

/// What to do with data the child writes to descriptors other than stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrBehavior {
    /// Forward stderr chunks to the diagnostic log.
    #[default]
    Log,
    /// Silently discard stderr.
    Drop,
}

/// Configuration for a process endpoint, fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Path of the executable to spawn.
    pub executable: PathBuf,
    /// Argument list, not including the executable itself.
    pub args: Vec<String>,
    /// Environment for the child.
    pub env: BTreeMap<String, String>,
    /// Working directory for the child, or inherit.
    pub working_directory: Option<PathBuf>,
    /// User id to run the child as.
    pub uid: Option<u32>,
    /// Group id to run the child as.
    pub gid: Option<u32>,
    /// Whether to give the child a pty instead of pipes.
    pub use_pty: bool,
    /// Explicit child descriptor mapping, or the conventional
    /// stdin/stdout/stderr pipes.
    pub child_fds: Option<BTreeMap<u32, ChildFd>>,
    /// Stderr handling mode. The driver ignores this; the process event
    /// adapter applies it.
    pub stderr: StderrBehavior,
}

impl ProcessConfig {
    /// Creates a configuration for `executable` with empty arguments and
    /// environment, no credential changes, no pty, conventional pipes, and
    /// stderr logging.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
            uid: None,
            gid: None,
            use_pty: false,
            child_fds: None,
            stderr: StderrBehavior::Log,
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the child environment.
    #[must_use]
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Sets the uid and gid to run as.
    #[must_use]
    pub const fn credentials(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Gives the child a pty.
    #[must_use]
    pub const fn use_pty(mut self, enabled: bool) -> Self {
        self.use_pty = enabled;
        self
    }

    /// Sets an explicit child descriptor mapping.
    #[must_use]
    pub fn child_fds(mut self, fds: BTreeMap<u32, ChildFd>) -> Self {
        self.child_fds = Some(fds);
        self
    }

    /// Sets the stderr handling mode.
    #[must_use]
    pub const fn stderr(mut self, behavior: StderrBehavior) -> Self {
        self.stderr = behavior;
        self
    }
}

/// How a spawned child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// The process exited with the given status code. Zero is a clean
    /// exit.
    Exited(i32),
    /// The process was terminated by a signal.
    Signaled(i32),
    /// The process never started.
    SpawnFailed(String),
}

/// The handle the driver exposes for a running child process.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// Writes data to the child's stdin.
    fn write_stdin(&self, data: Bytes);

    /// Closes the child's stdin.
    fn close_stdin(&self);

    /// Forcibly terminates the child.
    fn kill(&self);

    /// The child's pid, if it started.
    fn pid(&self) -> Option<u32>;
}

/// Receives lifecycle events for one spawned child process.
pub trait ProcessEventHandler: Send + fmt::Debug {
    /// The child started; `process` stays valid until
    /// [`process_ended`](Self::process_ended).
    fn process_started(&mut self, process: Arc<dyn ProcessHandle>);

    /// The child wrote `data` on descriptor `fd` (1 is stdout, 2 stderr).
    fn child_data_received(&mut self, fd: u32, data: Bytes);

    /// The child is gone; no further events follow.
    fn process_ended(&mut self, exit: ExitKind);
}

/// The raw connection-establishment surface of the external I/O driver.
///
/// Connect calls take ownership of a factory, build the protocol once the
/// transport is up, deliver `connection_made`, and pump subsequent events
/// into it; they return only after the attempt has succeeded or failed.
/// Listen calls return a bound port whose accepted connections are built
/// through the factory. Aborting an in-flight call is done by dropping its
/// future.
#[async_trait]
pub trait IoDriver: Send + Sync + fmt::Debug + 'static {
    /// Dials a stream socket.
    async fn connect_stream(
        &self,
        params: StreamConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()>;

    /// Dials a TLS-wrapped stream socket.
    async fn connect_tls(
        &self,
        params: TlsConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()>;

    /// Dials a Unix domain socket.
    async fn connect_unix(
        &self,
        params: UnixConnectParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<()>;

    /// Binds a stream-socket listener.
    async fn listen_stream(
        &self,
        params: StreamListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>>;

    /// Binds a TLS listener.
    async fn listen_tls(
        &self,
        params: TlsListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>>;

    /// Binds a Unix-socket listener.
    async fn listen_unix(
        &self,
        params: UnixListenParams,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>>;

    /// Wraps the process's inherited stdin/stdout pair as a single
    /// pseudo-connection.
    async fn listen_stdio(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>>;

    /// Adopts an already-listening descriptor. Ownership of `fd`
    /// transfers to the driver on success.
    async fn adopt_stream_port(
        &self,
        fd: RawFd,
        family: AddressFamily,
        factory: Box<dyn ProtocolFactory>,
    ) -> EndpointResult<Box<dyn ListeningPort>>;

    /// Spawns a child process, delivering its lifecycle to `handler`.
    /// An error return means the spawn primitive itself failed.
    async fn spawn_process(
        &self,
        config: ProcessConfig,
        handler: Box<dyn ProcessEventHandler>,
    ) -> EndpointResult<()>;
}
