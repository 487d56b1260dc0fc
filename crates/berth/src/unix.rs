//! Unix domain socket client and server endpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    Address, ClientEndpoint, EndpointError, IoDriver, ListeningPort, PendingConnection,
    ProtocolFactory, ServerEndpoint, SharedProtocol, UnixConnectParams, UnixListenParams,
};

use crate::tcp::{DEFAULT_BACKLOG, DEFAULT_CONNECT_TIMEOUT};
use crate::wrap::{WrappedClientFactory, WrappedServerFactory};

/// Socket-file permission bits applied when a description does not
/// specify a mode.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Dials a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixClientEndpoint {
    driver: Arc<dyn IoDriver>,
    path: PathBuf,
    timeout: Duration,
    check_peer_pid: bool,
}

impl UnixClientEndpoint {
    /// An endpoint dialing the socket at `path`, without pid lockfile
    /// checking.
    pub fn new(driver: Arc<dyn IoDriver>, path: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            path: path.into(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            check_peer_pid: false,
        }
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verifies the listener's pid lockfile before connecting.
    #[must_use]
    pub const fn check_peer_pid(mut self, check: bool) -> Self {
        self.check_peer_pid = check;
        self
    }
}

impl ClientEndpoint for UnixClientEndpoint {
    fn connect(&self, factory: Box<dyn ProtocolFactory>) -> PendingConnection<SharedProtocol> {
        let (pending, completion) = PendingConnection::new(Address::Unix(self.path.clone()));
        let wrapped = WrappedClientFactory::new(factory, completion.clone());
        let driver = Arc::clone(&self.driver);
        let params = UnixConnectParams {
            path: self.path.clone(),
            timeout: self.timeout,
            check_peer_pid: self.check_peer_pid,
        };
        let abort = completion.cancellation();
        tokio::spawn(async move {
            tokio::select! {
                () = abort.cancelled() => {
                    completion.fail(EndpointError::Connect("attempt aborted".into()));
                }
                result = driver.connect_unix(params, Box::new(wrapped)) => {
                    if let Err(e) = result {
                        completion.fail(e);
                    }
                }
            }
        });
        pending
    }
}

/// Listens on a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixServerEndpoint {
    driver: Arc<dyn IoDriver>,
    path: PathBuf,
    mode: u32,
    backlog: u32,
    want_peer_pid: bool,
}

impl UnixServerEndpoint {
    /// An endpoint binding the socket at `path` with the default mode,
    /// backlog, and a pid lockfile.
    pub fn new(driver: Arc<dyn IoDriver>, path: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            path: path.into(),
            mode: DEFAULT_SOCKET_MODE,
            backlog: DEFAULT_BACKLOG,
            want_peer_pid: true,
        }
    }

    /// Sets the socket-file permission bits.
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the accept-queue depth.
    #[must_use]
    pub const fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Controls whether a pid lockfile is kept next to the socket.
    #[must_use]
    pub const fn want_peer_pid(mut self, want: bool) -> Self {
        self.want_peer_pid = want;
        self
    }
}

impl ServerEndpoint for UnixServerEndpoint {
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>> {
        let (pending, completion) = PendingConnection::new(Address::Unix(self.path.clone()));
        let wrapped = WrappedServerFactory::new(factory);
        let driver = Arc::clone(&self.driver);
        let params = UnixListenParams {
            path: self.path.clone(),
            mode: self.mode,
            backlog: self.backlog,
            want_peer_pid: self.want_peer_pid,
        };
        tokio::spawn(async move {
            match driver.listen_unix(params, Box::new(wrapped)).await {
                Ok(port) => completion.fulfill(port),
                Err(e) => completion.fail(e),
            }
        });
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDriver, MemoryProtocolFactory};

    #[tokio::test]
    async fn test_connect_dials_path() {
        let driver = Arc::new(MemoryDriver::new());
        let endpoint = UnixClientEndpoint::new(
            Arc::clone(&driver) as Arc<dyn IoDriver>,
            "/var/run/finger",
        )
        .check_peer_pid(true);
        endpoint
            .connect(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(
            driver.state().unix_connects,
            vec![UnixConnectParams {
                path: "/var/run/finger".into(),
                timeout: DEFAULT_CONNECT_TIMEOUT,
                check_peer_pid: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_listen_passes_mode_and_lockfile_flag() {
        let driver = Arc::new(MemoryDriver::new());
        let endpoint = UnixServerEndpoint::new(
            Arc::clone(&driver) as Arc<dyn IoDriver>,
            "/var/run/finger",
        )
        .mode(0o660)
        .want_peer_pid(false);
        let port = endpoint
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(
            driver.state().unix_listens,
            vec![UnixListenParams {
                path: "/var/run/finger".into(),
                mode: 0o660,
                backlog: DEFAULT_BACKLOG,
                want_peer_pid: false,
            }]
        );
        assert_eq!(
            port.local_address(),
            Address::Unix("/var/run/finger".into())
        );
    }

    #[tokio::test]
    async fn test_cancel_yields_cancellation_error() {
        let driver: Arc<dyn IoDriver> = Arc::new(MemoryDriver::hanging());
        let endpoint = UnixClientEndpoint::new(driver, "/tmp/sock");
        let pending = endpoint.connect(Box::new(MemoryProtocolFactory::new()));
        pending.cancel();
        assert_eq!(
            pending.await.unwrap_err(),
            EndpointError::ConnectingCancelled {
                address: Address::Unix("/tmp/sock".into())
            }
        );
    }
}
