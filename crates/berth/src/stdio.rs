//! The standard-input/output pseudo-endpoint.
//!
//! Listening wraps the process's inherited stdin/stdout pair as a single
//! already-established connection; the "port" exists only so the server
//! surface is uniform.

use std::sync::Arc;

use berth_core::{
    Address, IoDriver, ListeningPort, PendingConnection, ProtocolFactory, ServerEndpoint,
};

use crate::wrap::WrappedServerFactory;

/// A server endpoint over the process's own stdin and stdout.
#[derive(Debug, Clone)]
pub struct StandardIoEndpoint {
    driver: Arc<dyn IoDriver>,
}

impl StandardIoEndpoint {
    /// An endpoint over the inherited standard streams.
    pub fn new(driver: Arc<dyn IoDriver>) -> Self {
        Self { driver }
    }
}

impl ServerEndpoint for StandardIoEndpoint {
    fn listen(
        &self,
        factory: Box<dyn ProtocolFactory>,
    ) -> PendingConnection<Box<dyn ListeningPort>> {
        let (pending, completion) = PendingConnection::new(Address::Stdio);
        let wrapped = WrappedServerFactory::new(factory);
        let driver = Arc::clone(&self.driver);
        tokio::spawn(async move {
            match driver.listen_stdio(Box::new(wrapped)).await {
                Ok(port) => completion.fulfill(port),
                Err(e) => completion.fail(e),
            }
        });
        pending
    }
}
