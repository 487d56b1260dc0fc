//! TCP client and server endpoints.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use berth_core::{
    Address, AddressFamily, ClientEndpoint, EndpointError, EndpointResult, IoDriver,
    ListeningPort, PendingConnection, ProtocolFactory, ServerEndpoint, SharedProtocol,
    StreamConnectParams, StreamListenParams,
};

use crate::wrap::{WrappedClientFactory, WrappedServerFactory};

/// Dial timeout applied when a description does not specify one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept-queue depth applied when a description does not specify one.
pub const DEFAULT_BACKLOG: u32 = 50;

/// Dials one TCP connection per [`connect`](ClientEndpoint::connect) call.
///
/// Host names are resolved before the driver is involved; the driver only
/// ever sees a concrete socket address.
#[derive(Debug, Clone)]
pub struct TcpClientEndpoint {
    driver: Arc<dyn IoDriver>,
    host: String,
    port: u16,
    timeout: Duration,
    bind_address: Option<SocketAddr>,
}

impl TcpClientEndpoint {
    /// An endpoint dialing `host:port` with the default timeout and no
    /// local bind.
    pub fn new(driver: Arc<dyn IoDriver>, host: impl Into<String>, port: u16) -> Self {
        Self {
            driver,
            host: host.into(),
            port,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            bind_address: None,
        }
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Binds the outbound socket to a local address.
    #[must_use]
    pub const fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }
}

impl ClientEndpoint for TcpClientEndpoint {
    fn connect(&self, factory: Box<dyn ProtocolFactory>) -> PendingConnection<SharedProtocol> {
        let address = Address::HostPort {
            host: self.host.clone(),
            port: self.port,
        };
        let (pending, completion) = PendingConnection::new(address);
        let wrapped = WrappedClientFactory::new(factory, completion.clone());
        let driver = Arc::clone(&self.driver);
        let host = self.host.clone();
        let port = self.port;
        let timeout = self.timeout;
        let bind_address = self.bind_address;
        let abort = completion.cancellation();
        tokio::spawn(async move {
            let attempt = async {
                let addr = resolve_host(&host, port).await?;
                driver
                    .connect_stream(
                        StreamConnectParams {
                            addr,
                            timeout,
                            bind_address,
                        },
                        Box::new(wrapped),
                    )
                    .await
            };
            tokio::select! {
                () = abort.cancelled() => {
                    debug!(host, port, "connection attempt aborted");
                    completion.fail(EndpointError::Connect("attempt aborted".into()));
                }
                result = attempt => {
                    if let Err(e) = result {
                        completion.fail(e);
                    }
                }
            }
        });
        pending
    }
}

/// Resolves `host` to the first address the system resolver returns.
///
/// Address literals short-circuit without touching the resolver. The
/// blocking lookup runs off the async threads.
pub(crate) async fn resolve_host(host: &str, port: u16) -> EndpointResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let query = (host.to_string(), port);
    let host = host.to_string();
    let resolved = tokio::task::spawn_blocking(move || {
        query.to_socket_addrs().map(|mut addrs| addrs.next())
    })
    .await
    .map_err(|e| EndpointError::Connect(format!("name resolution task failed: {e}")))?;
    match resolved {
        Ok(Some(addr)) => Ok(addr),
        Ok(None) => Err(EndpointError::Connect(format!(
            "no addresses found for {host}"
        ))),
        Err(e) => Err(EndpointError::Connect(format!(
            "name resolution for {host} failed: {e}"
        ))),
    }
}

/// Listens for TCP connections on one port.
#[derive(Debug, Clone)]
pub struct TcpServerEndpoint {
    driver: Arc<dyn IoDriver>,
    port: u16,
    interface: String,
    backlog: u32,
    family: AddressFamily,
}

impl TcpServerEndpoint {
    /// An IPv4 endpoint listening on `port`, all interfaces, default
    /// backlog.
    pub fn new(driver: Arc<dyn IoDriver>, port: u16) -> Self {
        Self {
            driver,
            port,
            interface: String::new(),
            backlog: DEFAULT_BACKLOG,
            family: AddressFamily::Inet,
        }
    }

    /// The IPv6 equivalent of [`new`](Self::new).
    pub fn new_v6(driver: Arc<dyn IoDriver>, port: u16) -> Self {
        Self {
            family: AddressFamily::Inet6,
            ..Self::new(driver, port)
        }
    }

    /// Restricts listening to one interface.
    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Sets the accept-queue depth.
    #[must_use]
    pub const fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    fn bind_address(&self) -> Address {
        let host = if self.interface.is_empty() {
            match self.family {
                AddressFamily::Inet6 => "::".to_string(),
                _ => "0.0.0.0".to_string(),
            }
        } else {
            self.interface.clone()
        };
        Address::HostPort {
            host,
            port: self.port,
        }
    }
}

impl ServerEndpoint for TcpServerEndpoint {
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>> {
        let (pending, completion) = PendingConnection::new(self.bind_address());
        let wrapped = WrappedServerFactory::new(factory);
        let driver = Arc::clone(&self.driver);
        let params = StreamListenParams {
            port: self.port,
            interface: self.interface.clone(),
            backlog: self.backlog,
            family: self.family,
        };
        tokio::spawn(async move {
            match driver.listen_stream(params, Box::new(wrapped)).await {
                Ok(port) => completion.fulfill(port),
                Err(e) => completion.fail(e),
            }
        });
        pending
    }
}
