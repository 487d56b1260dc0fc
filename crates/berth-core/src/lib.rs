//! # berth-core
//!
//! Core traits and types for the berth connection-establishment layer.
//! This crate provides the foundational abstractions the endpoint
//! implementations and the external I/O driver share.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Protocol`], [`ProtocolFactory`], [`Transport`],
//!   [`ListeningPort`], [`ClientEndpoint`], [`ServerEndpoint`], [`IoDriver`]
//! - **Futures**: [`PendingConnection`], [`Completion`]
//! - **Types**: [`Address`], [`AddressFamily`], [`DisconnectReason`],
//!   [`ProtocolCapabilities`], [`CertificateBundle`]
//! - **Process types**: [`ProcessConfig`], [`ExitKind`], [`ProcessHandle`],
//!   [`ProcessEventHandler`]
//! - **Errors**: [`EndpointError`], [`EndpointResult`]
//!
//! ## Usage
//!
//! Application protocols implement [`Protocol`] and declare any optional
//! capabilities they support:
//!
//! ```rust,ignore
//! use berth_core::{Protocol, ProtocolCapabilities, Transport};
//!
//! #[derive(Debug)]
//! struct Echo;
//!
//! impl Protocol for Echo {
//!     fn connection_made(&mut self, transport: std::sync::Arc<dyn Transport>) { /* ... */ }
//!     // ... other hooks
//! }
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

mod driver;
mod error;
mod future;
mod tls;
mod traits;
mod types;

// Re-export all public items
pub use driver::{
    ChildFd, ExitKind, IoDriver, ProcessConfig, ProcessEventHandler, ProcessHandle,
    StderrBehavior, StreamConnectParams, StreamListenParams, TlsConnectParams, TlsListenParams,
    UnixConnectParams, UnixListenParams,
};
pub use error::{EndpointError, EndpointResult};
pub use future::{Completion, PendingConnection};
pub use tls::CertificateBundle;
pub use traits::{
    ClientEndpoint, ListeningPort, Protocol, ProtocolFactory, ServerEndpoint, SharedProtocol,
    Transport,
};
pub use types::{Address, AddressFamily, DisconnectReason, ProtocolCapabilities};
