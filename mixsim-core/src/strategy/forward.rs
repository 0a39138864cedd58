//! Baseline mix that relays without delay.

use super::{Strategy, StrategyContext, StrategyError};
use crate::message::Message;
use crate::statistics::StatisticType;

/// Forwards every message the instant it arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct Forward;

impl Strategy for Forward {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        ctx.record(StatisticType::MixHoldingTime, 0.0);
        ctx.send(message)
    }
}
