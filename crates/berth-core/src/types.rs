//! Core endpoint types.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The address of one side of an established (or attempted) connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A resolved TCP (or TLS-over-TCP) socket address.
    Tcp(SocketAddr),
    /// A host name and port that have not been resolved yet.
    HostPort {
        /// Host name or address literal.
        host: String,
        /// TCP port number.
        port: u16,
    },
    /// A Unix domain socket path.
    Unix(PathBuf),
    /// A child process, identified by its pid once it is known.
    Process {
        /// The child's process id, if it has been assigned.
        pid: Option<u32>,
    },
    /// The synthetic peer of a standard-input/output pseudo-connection.
    Stdio,
    /// An adopted listening file descriptor.
    Fd(std::os::unix::io::RawFd),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::HostPort { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Process { pid: Some(pid) } => write!(f, "process:{pid}"),
            Self::Process { pid: None } => write!(f, "process"),
            Self::Stdio => write!(f, "stdio"),
            Self::Fd(fd) => write!(f, "fd:{fd}"),
        }
    }
}

/// The socket address family of an adopted file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 stream sockets.
    Inet,
    /// IPv6 stream sockets.
    Inet6,
    /// Unix domain stream sockets.
    Unix,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet => write!(f, "inet"),
            Self::Inet6 => write!(f, "inet6"),
            Self::Unix => write!(f, "unix"),
        }
    }
}

/// Why an established connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The connection was shut down cleanly.
    Done,
    /// The connection was lost without a clean shutdown.
    Lost(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "connection done"),
            Self::Lost(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

/// Describes the optional capabilities a protocol instance declares.
///
/// The wrapping layer queries this once per wrapped instance, at wrap time,
/// and forwards the corresponding transport events only when the matching
/// flag is set. Two instances built by the same factory may declare
/// different capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolCapabilities {
    /// Whether the protocol wants half-close notifications
    /// ([`read_closed`](crate::Protocol::read_closed) /
    /// [`write_closed`](crate::Protocol::write_closed)).
    pub half_close: bool,

    /// Whether the protocol accepts file descriptors passed over the
    /// transport ([`descriptor_received`](crate::Protocol::descriptor_received)).
    pub fd_passing: bool,

    /// Whether the protocol supplies its own logging identity
    /// ([`log_prefix`](crate::Protocol::log_prefix)).
    pub logging: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(
            Address::Tcp("127.0.0.1:80".parse().unwrap()).to_string(),
            "127.0.0.1:80"
        );
        assert_eq!(
            Address::HostPort {
                host: "example.com".into(),
                port: 443
            }
            .to_string(),
            "example.com:443"
        );
        assert_eq!(
            Address::Unix(PathBuf::from("/var/run/finger")).to_string(),
            "/var/run/finger"
        );
        assert_eq!(Address::Process { pid: Some(42) }.to_string(), "process:42");
        assert_eq!(Address::Stdio.to_string(), "stdio");
        assert_eq!(Address::Fd(13).to_string(), "fd:13");
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let caps = ProtocolCapabilities::default();
        assert!(!caps.half_close);
        assert!(!caps.fd_passing);
        assert!(!caps.logging);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Done.to_string(), "connection done");
        assert_eq!(
            DisconnectReason::Lost("process exited with status 1".into()).to_string(),
            "connection lost: process exited with status 1"
        );
    }
}
