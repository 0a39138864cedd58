//! Command definitions for the live node actor.

use tokio::sync::oneshot;

use crate::message::{Message, TransportMessage};
use crate::statistics::StatisticsRegistry;
use crate::strategy::StrategyError;

/// Commands that can be sent to a live node actor.
///
/// Each command carries a response channel; the actor answers once the
/// strategy has processed the input and resulting sends were accepted by
/// the outbound channel.
#[derive(Debug)]
pub enum LiveNodeCommand {
    /// Application data submitted by the local user.
    ApplicationData {
        data: TransportMessage,
        responder: oneshot::Sender<Result<(), StrategyError>>,
    },
    /// Message received from the network.
    NetworkMessage {
        message: Message,
        responder: oneshot::Sender<Result<(), StrategyError>>,
    },
    /// Snapshot of the statistics recorded so far.
    Statistics {
        responder: oneshot::Sender<StatisticsRegistry>,
    },
    /// Stop the node, canceling all pending timers.
    Shutdown { responder: oneshot::Sender<()> },
}
