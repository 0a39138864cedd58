//! Coalescing sender: waits briefly for further data before sending.

use std::collections::VecDeque;

use super::{
    FiredTimer, Strategy, StrategyContext, StrategyError, TimerHandle, TimerKind, accept_reply,
    arm_timeout, claim_timeout, disarm_timeout,
};
use crate::SimTime;
use crate::config::WaitForDataConfig;
use crate::message::{Direction, Message, TransportMessage, fill_from_queue};

/// Holds an open message until it is full or `timeout` elapses.
///
/// Idle until data arrives; the first data opens a message and arms the
/// timeout. Filling the message sends it at once and cancels the timeout.
#[derive(Debug)]
pub struct WaitForData {
    timeout: SimTime,
    pending: VecDeque<TransportMessage>,
    open: Option<Message>,
    flush_timer: Option<TimerHandle>,
}

impl WaitForData {
    pub fn new(config: &WaitForDataConfig) -> Self {
        Self {
            timeout: config.timeout,
            pending: VecDeque::new(),
            open: None,
            flush_timer: None,
        }
    }

    /// Whether a partially filled message is waiting.
    pub fn is_idle(&self) -> bool {
        self.open.is_none()
    }

    fn drain(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        while !self.pending.is_empty() {
            let mut message = match self.open.take() {
                Some(message) => message,
                None => {
                    let at = ctx.now() + self.timeout;
                    arm_timeout(
                        &mut self.flush_timer,
                        ctx,
                        at,
                        TimerKind::FlushTimeout,
                        "wait-for-data",
                    )?;
                    ctx.new_message(Direction::Request)
                }
            };

            fill_from_queue(&mut message, &mut self.pending)?;

            if message.is_full() {
                disarm_timeout(&mut self.flush_timer, ctx);
                ctx.send(message)?;
            } else {
                self.open = Some(message);
            }
        }
        Ok(())
    }
}

impl Strategy for WaitForData {
    fn name(&self) -> &'static str {
        "wait-for-data"
    }

    fn on_incoming_application_data(
        &mut self,
        ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.pending.push_back(data);
        self.drain(ctx)
    }

    fn on_incoming_network_message(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        accept_reply(self.name(), &message)
    }

    fn on_timer_fired(
        &mut self,
        ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        if timer.kind != TimerKind::FlushTimeout {
            return Err(StrategyError::UnexpectedTimer {
                strategy: self.name(),
                kind: timer.kind,
            });
        }
        claim_timeout(&mut self.flush_timer, &timer, "wait-for-data")?;

        let message = match self.open.take() {
            Some(message) if !message.is_empty() => message,
            _ => ctx.new_dummy(Direction::Request),
        };
        tracing::trace!(
            "{} flush timeout at {}: sending {} bytes",
            ctx.owner(),
            ctx.now(),
            message.used_space()
        );
        ctx.send(message)
    }
}
