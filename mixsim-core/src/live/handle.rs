//! Handle for communicating with a live node actor.

use tokio::sync::{mpsc, oneshot};

use super::commands::LiveNodeCommand;
use crate::message::{Message, TransportMessage};
use crate::statistics::StatisticsRegistry;
use crate::{MixSimError, Result};

/// Cloneable async API of a live node.
#[derive(Clone)]
pub struct LiveNodeHandle {
    sender: mpsc::Sender<LiveNodeCommand>,
}

impl LiveNodeHandle {
    /// Creates a new handle with the given command sender.
    pub fn new(sender: mpsc::Sender<LiveNodeCommand>) -> Self {
        Self { sender }
    }

    /// Hands application data to the node's send strategy.
    ///
    /// Resolves once the strategy processed the data and every message it
    /// sent was accepted by the outbound channel.
    ///
    /// # Errors
    ///
    /// - `MixSimError::Strategy` - The strategy rejected the input; the node stops
    /// - `MixSimError::LiveNode` - The node is no longer running
    pub async fn submit_application_data(&self, data: TransportMessage) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.request(LiveNodeCommand::ApplicationData { data, responder })
            .await?;
        Ok(rx.await.map_err(|_| stopped())??)
    }

    /// Delivers a message received from the network.
    ///
    /// # Errors
    ///
    /// - `MixSimError::Strategy` - The strategy rejected the message; the node stops
    /// - `MixSimError::LiveNode` - The node is no longer running
    pub async fn deliver_network_message(&self, message: Message) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.request(LiveNodeCommand::NetworkMessage { message, responder })
            .await?;
        Ok(rx.await.map_err(|_| stopped())??)
    }

    /// Snapshot of the statistics recorded by the node so far.
    ///
    /// # Errors
    ///
    /// - `MixSimError::LiveNode` - The node is no longer running
    pub async fn statistics(&self) -> Result<StatisticsRegistry> {
        let (responder, rx) = oneshot::channel();
        self.request(LiveNodeCommand::Statistics { responder })
            .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Stops the node and cancels its pending timers.
    ///
    /// # Errors
    ///
    /// - `MixSimError::LiveNode` - The node had already stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.request(LiveNodeCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn request(&self, command: LiveNodeCommand) -> Result<()> {
        self.sender.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> MixSimError {
    MixSimError::LiveNode {
        reason: "node is not running".to_string(),
    }
}
