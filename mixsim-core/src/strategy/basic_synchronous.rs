//! Constant-rate sending with dummy injection.

use std::collections::VecDeque;

use super::{
    FiredTimer, Strategy, StrategyContext, StrategyError, TimerHandle, TimerKind, accept_reply,
    arm_timeout, claim_timeout,
};
use crate::SimTime;
use crate::config::BasicSynchronousConfig;
use crate::message::{Direction, Message, TransportMessage, fill_from_queue};

/// Sends exactly one message per interval.
///
/// Data is buffered until the next slot. An empty slot still produces a
/// dummy so the observable send rate never depends on user activity.
#[derive(Debug)]
pub struct BasicSynchronous {
    interval: SimTime,
    pending: VecDeque<TransportMessage>,
    tick: Option<TimerHandle>,
}

impl BasicSynchronous {
    pub fn new(config: &BasicSynchronousConfig) -> Self {
        Self {
            interval: config.interval,
            pending: VecDeque::new(),
            tick: None,
        }
    }

    /// Bytes waiting for a send slot.
    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(TransportMessage::remaining).sum()
    }

    fn arm_next_tick(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        let at = ctx.now() + self.interval;
        arm_timeout(&mut self.tick, ctx, at, TimerKind::SendTick, "basic-synchronous")
    }
}

impl Strategy for BasicSynchronous {
    fn name(&self) -> &'static str {
        "basic-synchronous"
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        self.arm_next_tick(ctx)
    }

    fn on_incoming_application_data(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.pending.push_back(data);
        Ok(())
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
        if timer.kind != TimerKind::SendTick {
            return Err(StrategyError::UnexpectedTimer {
                strategy: self.name(),
                kind: timer.kind,
            });
        }
        claim_timeout(&mut self.tick, &timer, "basic-synchronous")?;

        let mut message = ctx.new_message(Direction::Request);
        fill_from_queue(&mut message, &mut self.pending)?;
        if message.is_empty() {
            message = ctx.new_dummy(Direction::Request);
        }
        tracing::trace!(
            "{} slot at {}: {} bytes, dummy={}",
            ctx.owner(),
            ctx.now(),
            message.used_space(),
            message.is_dummy()
        );
        ctx.send(message)?;

        self.arm_next_tick(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::RecordingContext;

    fn strategy(interval: SimTime) -> BasicSynchronous {
        BasicSynchronous::new(&BasicSynchronousConfig { interval })
    }

    #[test]
    fn test_idle_client_sends_floor_duration_over_interval_dummies() {
        let mut ctx = RecordingContext::new(64);
        let mut sync = strategy(30);
        sync.on_start(&mut ctx).unwrap();

        ctx.advance_to(&mut sync, 100).unwrap();

        assert_eq!(ctx.sent.len(), 3);
        assert!(ctx.sent.iter().all(|(_, m)| m.is_dummy()));
        let times: Vec<SimTime> = ctx.sent.iter().map(|(at, _)| *at).collect();
        assert_eq!(times, vec![30, 60, 90]);
    }

    #[test]
    fn test_buffered_data_waits_for_slot() {
        let mut ctx = RecordingContext::new(64);
        let mut sync = strategy(10);
        sync.on_start(&mut ctx).unwrap();

        let data = ctx.transport(100);
        sync.on_incoming_application_data(&mut ctx, data).unwrap();
        assert!(ctx.sent.is_empty());
        assert_eq!(sync.pending_bytes(), 100);

        ctx.advance_to(&mut sync, 30).unwrap();

        let used: Vec<usize> = ctx.sent.iter().map(|(_, m)| m.used_space()).collect();
        assert_eq!(used, vec![64, 36, 0]);
        assert!(ctx.sent[2].1.is_dummy());
        assert_eq!(sync.pending_bytes(), 0);
    }

    #[test]
    fn test_exactly_one_tick_outstanding() {
        let mut ctx = RecordingContext::new(64);
        let mut sync = strategy(10);
        sync.on_start(&mut ctx).unwrap();
        ctx.advance_to(&mut sync, 55).unwrap();
        assert_eq!(ctx.pending_timers(), 1);
        assert_eq!(ctx.next_timer_at(), Some(60));
    }

    #[test]
    fn test_starting_twice_is_rejected() {
        let mut ctx = RecordingContext::new(64);
        let mut sync = strategy(10);
        sync.on_start(&mut ctx).unwrap();
        assert!(matches!(
            sync.on_start(&mut ctx),
            Err(StrategyError::DuplicateTimeout { .. })
        ));
    }

    #[test]
    fn test_stale_tick_names_strategy() {
        let mut ctx = RecordingContext::new(64);
        let mut sync = strategy(10);
        sync.on_start(&mut ctx).unwrap();

        let result = sync.on_timer_fired(
            &mut ctx,
            FiredTimer {
                handle: TimerHandle(99),
                kind: TimerKind::SendTick,
                attachment: None,
            },
        );
        assert!(matches!(
            result,
            Err(StrategyError::StaleTimer {
                strategy: "basic-synchronous",
                ..
            })
        ));
        assert_eq!(ctx.pending_timers(), 1);
    }
}
