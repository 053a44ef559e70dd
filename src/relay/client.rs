//! Client-side transport seams of the relay.
//!
//! The relay never talks to a WebSocket actor directly. It reads parsed
//! client messages from a [`ClientSource`] and writes through a
//! [`ClientSink`], so the actix actor, tests and any future transport plug in
//! the same way.

use crate::error::AppResult;
use crate::relay::protocol::{ClientInbound, ClientOutbound};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Inbound half of the client connection.
#[async_trait]
pub trait ClientSource: Send {
    /// Next message from the client, or `None` once the client is gone.
    async fn next_message(&mut self) -> Option<ClientInbound>;
}

/// Outbound half of the client connection. Shared by both forwarding loops
/// and by the lifecycle controller.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Fails when the client can no longer be written to.
    async fn send(&self, message: ClientOutbound) -> AppResult<()>;

    fn is_writable(&self) -> bool;

    /// Close the connection. Closing twice is harmless.
    async fn close(&self);
}

/// [`ClientSource`] fed through an unbounded channel.
///
/// The transport owns the sender; dropping it is how a disconnect is seen.
#[derive(Debug)]
pub struct ChannelClientSource {
    rx: mpsc::UnboundedReceiver<ClientInbound>,
}

impl ChannelClientSource {
    pub fn new() -> (mpsc::UnboundedSender<ClientInbound>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl ClientSource for ChannelClientSource {
    async fn next_message(&mut self) -> Option<ClientInbound> {
        self.rx.recv().await
    }
}
