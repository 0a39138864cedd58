//! Reply-clocked request pacing for duplex traffic.

use std::collections::VecDeque;

use super::{Strategy, StrategyContext, StrategyError};
use crate::message::{Direction, Message, TransportMessage, fill_from_queue};

/// Sends a new request only after the previous one was answered.
///
/// The first request goes out on start (a dummy when nothing is queued).
/// Every following request is triggered by a reply or by a delivery
/// acknowledgement, never by a timer.
#[derive(Debug, Default)]
pub struct WaitForReply {
    pending: VecDeque<TransportMessage>,
    awaiting_reply: bool,
}

impl WaitForReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request is in flight.
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    fn send_next(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        let mut message = ctx.new_message(Direction::Request);
        fill_from_queue(&mut message, &mut self.pending)?;
        if message.is_empty() {
            message = ctx.new_dummy(Direction::Request);
        }
        self.awaiting_reply = true;
        ctx.send(message)
    }
}

impl Strategy for WaitForReply {
    fn name(&self) -> &'static str {
        "wait-for-reply"
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        self.send_next(ctx)
    }

    fn on_incoming_application_data(
        &mut self,
        ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.pending.push_back(data);
        if self.awaiting_reply {
            return Ok(());
        }
        self.send_next(ctx)
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        if message.direction() != Direction::Reply {
            return Err(StrategyError::UnexpectedInput {
                strategy: self.name(),
                input: "request at client",
            });
        }
        self.awaiting_reply = false;
        self.send_next(ctx)
    }

    fn on_delivery_acknowledged(
        &mut self,
        ctx: &mut dyn StrategyContext,
    ) -> Result<(), StrategyError> {
        self.awaiting_reply = false;
        self.send_next(ctx)
    }
}
