//! # berth
//!
//! String-described, plugin-extensible connection endpoints.
//!
//! An endpoint packages everything needed to establish one kind of
//! connection - dial TCP, listen on a Unix socket, spawn a child process,
//! adopt an inherited descriptor - behind two small traits, so code that
//! speaks a protocol never hard-codes how its connections are made.
//! Endpoints are usually built from description strings like
//! `tcp:80:interface=127.0.0.1` or `unix:/var/run/finger:mode=660`, which
//! makes the transport an ordinary piece of configuration.
//!
//! ## Overview
//!
//! - [`EndpointRegistry`] turns description strings into endpoints and
//!   accepts third-party [`EndpointStringParser`] plugins for new type
//!   tags.
//! - [`TcpClientEndpoint`], [`TlsServerEndpoint`], [`UnixClientEndpoint`],
//!   [`StandardIoEndpoint`], [`AdoptedStreamServerEndpoint`],
//!   [`ProcessEndpoint`] and friends are the concrete endpoint types.
//! - Every attempt yields a [`PendingConnection`]: a future fulfilled or
//!   failed exactly once, cancellable while in flight.
//! - [`MemoryDriver`] is an in-memory [`IoDriver`] for testing endpoint
//!   behavior without sockets.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use berth::{EndpointRegistry, IoDriver};
//!
//! let registry = EndpointRegistry::new();
//! let endpoint = registry.server_from_string(driver, "tcp:8080")?;
//! let port = endpoint.listen(Box::new(factory)).await?;
//! println!("listening on {}", port.local_address());
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod adopted;
mod memory;
mod parser;
mod process;
mod registry;
mod stdio;
mod tcp;
mod tls;
mod unix;
mod wrap;

pub use adopted::{AdoptedStreamServerEndpoint, FdOps, ListenFds, SystemFdOps};
pub use memory::{
    MemoryBehavior, MemoryDriver, MemoryListeningPort, MemoryProcessHandle, MemoryProtocol,
    MemoryProtocolFactory, MemoryProtocolRecord, MemoryState, MemoryTransport,
};
pub use parser::{quote_string_argument, EndpointDescriptor};
pub use process::{disconnect_reason_for_exit, ProcessEndpoint, ProcessTransport};
pub use registry::{EndpointRegistry, EndpointStringParser};
pub use stdio::StandardIoEndpoint;
pub use tcp::{TcpClientEndpoint, TcpServerEndpoint, DEFAULT_BACKLOG, DEFAULT_CONNECT_TIMEOUT};
pub use tls::{TlsClientEndpoint, TlsServerEndpoint};
pub use unix::{UnixClientEndpoint, UnixServerEndpoint, DEFAULT_SOCKET_MODE};
pub use wrap::{WrappedClientFactory, WrappedProtocol, WrappedServerFactory};

// The core abstractions, re-exported so a single dependency suffices.
pub use berth_core::{
    Address, AddressFamily, CertificateBundle, ChildFd, ClientEndpoint, Completion,
    DisconnectReason, EndpointError, EndpointResult, ExitKind, IoDriver, ListeningPort,
    PendingConnection, ProcessConfig, ProcessEventHandler, ProcessHandle, Protocol,
    ProtocolCapabilities, ProtocolFactory, ServerEndpoint, SharedProtocol, StderrBehavior,
    StreamConnectParams, StreamListenParams, TlsConnectParams, TlsListenParams, Transport,
    UnixConnectParams, UnixListenParams,
};
