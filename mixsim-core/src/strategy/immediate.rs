//! Immediate sending: no timers, no cover traffic.

use std::collections::VecDeque;

use super::{Strategy, StrategyContext, StrategyError, accept_reply};
use crate::message::{Direction, Message, TransportMessage, fill_from_queue};

/// Packs incoming data into messages and sends each one right away.
///
/// A message leaves as soon as it is full or the data is exhausted, so no
/// partially filled message survives between calls.
#[derive(Debug, Default)]
pub struct ImmediateSend {
    pending: VecDeque<TransportMessage>,
}

impl ImmediateSend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for ImmediateSend {
    fn name(&self) -> &'static str {
        "immediate"
    }

    fn on_incoming_application_data(
        &mut self,
        ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.pending.push_back(data);

        while !self.pending.is_empty() {
            let mut message = ctx.new_message(Direction::Request);
            fill_from_queue(&mut message, &mut self.pending)?;
            if message.is_empty() {
                break;
            }
            ctx.send(message)?;
        }

        Ok(())
    }

    fn on_incoming_network_message(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        accept_reply(self.name(), &message)
    }
}
