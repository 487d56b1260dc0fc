//! Adopting already-listening file descriptors.
//!
//! An adopted endpoint wraps one descriptor some other process (typically
//! a service manager) bound and passed to us. The descriptor is usable
//! exactly once: the endpoint marks it non-blocking, hands it to the
//! driver, and closes its own copy once the driver has duplicated it.

use std::env;
use std::io;
use std::os::unix::io::RawFd;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use berth_core::{
    Address, AddressFamily, EndpointError, IoDriver, ListeningPort, PendingConnection,
    ProtocolFactory, ServerEndpoint,
};

use crate::wrap::WrappedServerFactory;

/// The descriptor-level operations the endpoint needs, injectable so
/// tests can observe them without real descriptors.
pub trait FdOps: Send + Sync + std::fmt::Debug {
    /// Puts `fd` into non-blocking mode.
    fn set_non_blocking(&self, fd: RawFd) -> io::Result<()>;

    /// Closes `fd`.
    fn close(&self, fd: RawFd) -> io::Result<()>;
}

/// [`FdOps`] backed by the real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFdOps;

impl FdOps for SystemFdOps {
    fn set_non_blocking(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl on a caller-supplied descriptor touches no memory.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: closing a descriptor we own.
        let rc = unsafe { libc::close(fd) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// A single-use server endpoint over an adopted listening descriptor.
///
/// The second and every later [`listen`](ServerEndpoint::listen) call
/// fails with [`EndpointError::AlreadyListened`].
#[derive(Debug)]
pub struct AdoptedStreamServerEndpoint {
    driver: Arc<dyn IoDriver>,
    fd: RawFd,
    family: AddressFamily,
    used: AtomicBool,
    fd_ops: Arc<dyn FdOps>,
}

impl AdoptedStreamServerEndpoint {
    /// An endpoint adopting `fd`, which must already be listening.
    pub fn new(driver: Arc<dyn IoDriver>, fd: RawFd, family: AddressFamily) -> Self {
        Self {
            driver,
            fd,
            family,
            used: AtomicBool::new(false),
            fd_ops: Arc::new(SystemFdOps),
        }
    }

    /// Replaces the descriptor operations.
    #[must_use]
    pub fn with_fd_ops(mut self, fd_ops: Arc<dyn FdOps>) -> Self {
        self.fd_ops = fd_ops;
        self
    }
}

impl ServerEndpoint for AdoptedStreamServerEndpoint {
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>> {
        let (pending, completion) = PendingConnection::new(Address::Fd(self.fd));
        if self.used.swap(true, Ordering::SeqCst) {
            completion.fail(EndpointError::AlreadyListened);
            return pending;
        }
        if let Err(e) = self.fd_ops.set_non_blocking(self.fd) {
            completion.fail(e.into());
            return pending;
        }
        info!(fd = self.fd, family = %self.family, "adopting listening descriptor");
        let wrapped = WrappedServerFactory::new(factory);
        let driver = Arc::clone(&self.driver);
        let fd_ops = Arc::clone(&self.fd_ops);
        let fd = self.fd;
        let family = self.family;
        tokio::spawn(async move {
            match driver.adopt_stream_port(fd, family, Box::new(wrapped)).await {
                Ok(port) => {
                    // The driver holds its own duplicate now.
                    if let Err(e) = fd_ops.close(fd) {
                        warn!(fd, error = %e, "closing adopted descriptor failed");
                    }
                    completion.fulfill(port);
                }
                Err(e) => completion.fail(e),
            }
        });
        pending
    }
}

/// The inventory of listening descriptors inherited from the service
/// manager's socket-activation protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenFds {
    fds: Vec<RawFd>,
}

impl ListenFds {
    /// The first descriptor number the activation protocol uses.
    pub const FIRST_SOCKET_FD: RawFd = 3;

    /// Reads the inventory from `LISTEN_FDS` and `LISTEN_PID`.
    ///
    /// The inventory is empty unless `LISTEN_PID` names this process.
    pub fn from_env() -> Self {
        let count: u32 = env::var("LISTEN_FDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let addressed_to_us = env::var("LISTEN_PID")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .is_some_and(|pid| pid == process::id());
        if addressed_to_us {
            Self::from_count(count)
        } else {
            Self { fds: Vec::new() }
        }
    }

    /// An inventory of `count` descriptors starting at
    /// [`FIRST_SOCKET_FD`](Self::FIRST_SOCKET_FD).
    pub fn from_count(count: u32) -> Self {
        let fds = (0..count)
            .map(|i| Self::FIRST_SOCKET_FD + i as RawFd)
            .collect();
        Self { fds }
    }

    /// An inventory of explicit descriptors.
    pub fn from_descriptors(fds: Vec<RawFd>) -> Self {
        Self { fds }
    }

    /// The descriptor at `index`, if the inventory has one.
    pub fn descriptor(&self, index: usize) -> Option<RawFd> {
        self.fds.get(index).copied()
    }

    /// How many descriptors were inherited.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Whether no descriptors were inherited.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDriver, MemoryProtocolFactory};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct RecordingFdOps {
        nonblocking: StdMutex<Vec<RawFd>>,
        closed: StdMutex<Vec<RawFd>>,
        fail_nonblocking: bool,
    }

    impl FdOps for RecordingFdOps {
        fn set_non_blocking(&self, fd: RawFd) -> io::Result<()> {
            if self.fail_nonblocking {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            self.nonblocking.lock().unwrap().push(fd);
            Ok(())
        }

        fn close(&self, fd: RawFd) -> io::Result<()> {
            self.closed.lock().unwrap().push(fd);
            Ok(())
        }
    }

    fn endpoint(
        driver: Arc<MemoryDriver>,
        ops: Arc<RecordingFdOps>,
    ) -> AdoptedStreamServerEndpoint {
        AdoptedStreamServerEndpoint::new(driver as Arc<dyn IoDriver>, 7, AddressFamily::Inet6)
            .with_fd_ops(ops)
    }

    #[tokio::test]
    async fn test_listen_adopts_then_closes_our_copy() {
        let driver = Arc::new(MemoryDriver::new());
        let ops = Arc::new(RecordingFdOps::default());
        let ep = endpoint(Arc::clone(&driver), Arc::clone(&ops));
        let port = ep
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        assert_eq!(
            driver.state().adopted_ports,
            vec![(7, AddressFamily::Inet6)]
        );
        assert_eq!(*ops.nonblocking.lock().unwrap(), vec![7]);
        assert_eq!(*ops.closed.lock().unwrap(), vec![7]);
        assert_eq!(port.local_address(), Address::Fd(7));
    }

    #[tokio::test]
    async fn test_second_listen_fails_with_already_listened() {
        let driver = Arc::new(MemoryDriver::new());
        let ops = Arc::new(RecordingFdOps::default());
        let ep = endpoint(driver, ops);
        ep.listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap();
        let err = ep
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap_err();
        assert_eq!(err, EndpointError::AlreadyListened);
    }

    #[tokio::test]
    async fn test_failed_adoption_keeps_descriptor_open() {
        let driver = Arc::new(MemoryDriver::failing(EndpointError::CannotListen(
            "bad fd".into(),
        )));
        let ops = Arc::new(RecordingFdOps::default());
        let ep = endpoint(driver, Arc::clone(&ops));
        let err = ep
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap_err();
        assert_eq!(err, EndpointError::CannotListen("bad fd".into()));
        assert!(ops.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nonblocking_failure_fails_before_the_driver() {
        let driver = Arc::new(MemoryDriver::new());
        let ops = Arc::new(RecordingFdOps {
            fail_nonblocking: true,
            ..RecordingFdOps::default()
        });
        let ep = endpoint(Arc::clone(&driver), ops);
        let err = ep
            .listen(Box::new(MemoryProtocolFactory::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::Io(_)));
        assert!(driver.state().adopted_ports.is_empty());
    }

    #[test]
    fn test_listen_fds_inventory() {
        let fds = ListenFds::from_count(3);
        assert_eq!(fds.len(), 3);
        assert_eq!(fds.descriptor(0), Some(3));
        assert_eq!(fds.descriptor(2), Some(5));
        assert_eq!(fds.descriptor(3), None);
    }

    #[test]
    fn test_explicit_descriptors() {
        let fds = ListenFds::from_descriptors(vec![10, 12]);
        assert_eq!(fds.descriptor(1), Some(12));
        assert!(!fds.is_empty());
    }
}
