//! TLS-over-TCP client and server endpoints.
//!
//! These carry certificate material to the driver; the handshake itself is
//! the driver's job.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{
    Address, AddressFamily, CertificateBundle, ClientEndpoint, EndpointError, IoDriver,
    ListeningPort, PendingConnection, ProtocolFactory, ServerEndpoint, SharedProtocol,
    StreamConnectParams, StreamListenParams, TlsConnectParams, TlsListenParams,
};

use crate::tcp::{DEFAULT_BACKLOG, DEFAULT_CONNECT_TIMEOUT, resolve_host};
use crate::wrap::{WrappedClientFactory, WrappedServerFactory};

/// Dials TLS connections, presenting `host` for certificate verification.
#[derive(Debug, Clone)]
pub struct TlsClientEndpoint {
    driver: Arc<dyn IoDriver>,
    host: String,
    port: u16,
    timeout: Duration,
    bind_address: Option<SocketAddr>,
    certificates: CertificateBundle,
}

impl TlsClientEndpoint {
    /// An endpoint dialing `host:port` with no client identity and no
    /// peer verification.
    pub fn new(driver: Arc<dyn IoDriver>, host: impl Into<String>, port: u16) -> Self {
        Self {
            driver,
            host: host.into(),
            port,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            bind_address: None,
            certificates: CertificateBundle::default(),
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

    /// Sets the client identity and trust anchors.
    #[must_use]
    pub fn certificates(mut self, certificates: CertificateBundle) -> Self {
        self.certificates = certificates;
        self
    }
}

impl ClientEndpoint for TlsClientEndpoint {
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
        let certificates = self.certificates.clone();
        let abort = completion.cancellation();
        tokio::spawn(async move {
            let attempt = async {
                let addr = resolve_host(&host, port).await?;
                driver
                    .connect_tls(
                        TlsConnectParams {
                            stream: StreamConnectParams {
                                addr,
                                timeout,
                                bind_address,
                            },
                            server_name: host.clone(),
                            certificates,
                        },
                        Box::new(wrapped),
                    )
                    .await
            };
            tokio::select! {
                () = abort.cancelled() => {
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

/// Listens for TLS connections on one port.
#[derive(Debug, Clone)]
pub struct TlsServerEndpoint {
    driver: Arc<dyn IoDriver>,
    port: u16,
    interface: String,
    backlog: u32,
    certificates: CertificateBundle,
}

impl TlsServerEndpoint {
    /// An endpoint listening on `port` with the given server key and
    /// certificate.
    pub fn new(driver: Arc<dyn IoDriver>, port: u16, certificates: CertificateBundle) -> Self {
        Self {
            driver,
            port,
            interface: String::new(),
            backlog: DEFAULT_BACKLOG,
            certificates,
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
}

impl ServerEndpoint for TlsServerEndpoint {
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>> {
        let host = if self.interface.is_empty() {
            "0.0.0.0".to_string()
        } else {
            self.interface.clone()
        };
        let (pending, completion) = PendingConnection::new(Address::HostPort {
            host,
            port: self.port,
        });
        let wrapped = WrappedServerFactory::new(factory);
        let driver = Arc::clone(&self.driver);
        let params = TlsListenParams {
            stream: StreamListenParams {
                port: self.port,
                interface: self.interface.clone(),
                backlog: self.backlog,
                family: AddressFamily::Inet,
            },
            certificates: self.certificates.clone(),
        };
        tokio::spawn(async move {
            match driver.listen_tls(params, Box::new(wrapped)).await {
                Ok(port) => completion.fulfill(port),
                Err(e) => completion.fail(e),
            }
        });
        pending
    }
}
