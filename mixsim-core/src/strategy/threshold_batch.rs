//! Synchronous threshold batching with timeout.

use super::{
    FiredTimer, Strategy, StrategyContext, StrategyError, TimerHandle, TimerKind, arm_timeout,
    claim_timeout, disarm_timeout,
};
use crate::SimTime;
use crate::config::ThresholdBatchConfig;
use crate::message::{Direction, Message};
use crate::statistics::StatisticType;

#[derive(Debug, Default)]
struct Batch {
    entries: Vec<(SimTime, Message)>,
    timeout: Option<TimerHandle>,
}

/// Collects messages and releases them together.
///
/// Requests and replies are batched separately. A batch is released when it
/// reaches `threshold` messages or when the timeout armed by its first
/// message fires, whichever comes first. Released messages are sorted by
/// their canonical key so the output order reveals nothing about arrival.
#[derive(Debug)]
pub struct ThresholdBatch {
    threshold: usize,
    timeout: Option<SimTime>,
    requests: Batch,
    replies: Batch,
}

impl ThresholdBatch {
    pub fn new(config: &ThresholdBatchConfig) -> Self {
        Self {
            threshold: config.threshold,
            timeout: config.timeout,
            requests: Batch::default(),
            replies: Batch::default(),
        }
    }

    /// Messages currently held for `direction`.
    pub fn batched(&self, direction: Direction) -> usize {
        self.batch(direction).entries.len()
    }

    fn batch(&self, direction: Direction) -> &Batch {
        match direction {
            Direction::Request => &self.requests,
            Direction::Reply => &self.replies,
        }
    }

    fn batch_mut(&mut self, direction: Direction) -> &mut Batch {
        match direction {
            Direction::Request => &mut self.requests,
            Direction::Reply => &mut self.replies,
        }
    }

    fn flush(
        &mut self,
        ctx: &mut dyn StrategyContext,
        direction: Direction,
    ) -> Result<(), StrategyError> {
        let mut entries = std::mem::take(&mut self.batch_mut(direction).entries);
        entries.sort_by_cached_key(|(_, message)| message.canonical_key());

        let now = ctx.now();
        tracing::debug!(
            "{} releasing {:?} batch of {} at {}",
            ctx.owner(),
            direction,
            entries.len(),
            now
        );
        ctx.record(StatisticType::BatchSize, entries.len() as f64);

        for (arrived_at, message) in entries {
            tracing::trace!(
                "{} batch slot {} key {}",
                ctx.owner(),
                message.id(),
                hex::encode(message.canonical_key())
            );
            ctx.record(StatisticType::MixHoldingTime, (now - arrived_at) as f64);
            ctx.send(message)?;
        }
        Ok(())
    }
}

impl Strategy for ThresholdBatch {
    fn name(&self) -> &'static str {
        "threshold-batch"
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        let direction = message.direction();
        let now = ctx.now();
        let threshold = self.threshold;
        let timeout = self.timeout;
        let batch = self.batch_mut(direction);

        if batch.entries.is_empty()
            && let Some(timeout) = timeout
        {
            arm_timeout(
                &mut batch.timeout,
                ctx,
                now + timeout,
                TimerKind::BatchTimeout(direction),
                "threshold-batch",
            )?;
        }
        batch.entries.push((now, message));

        if batch.entries.len() >= threshold {
            disarm_timeout(&mut batch.timeout, ctx);
            self.flush(ctx, direction)?;
        }
        Ok(())
    }

    fn on_timer_fired(
        &mut self,
        ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        let TimerKind::BatchTimeout(direction) = timer.kind else {
            return Err(StrategyError::UnexpectedTimer {
                strategy: self.name(),
                kind: timer.kind,
            });
        };
        claim_timeout(&mut self.batch_mut(direction).timeout, &timer, "threshold-batch")?;
        self.flush(ctx, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StatisticValue;
    use crate::strategy::testing::RecordingContext;

    fn strategy(threshold: usize, timeout: Option<SimTime>) -> ThresholdBatch {
        ThresholdBatch::new(&ThresholdBatchConfig { threshold, timeout })
    }

    #[test]
    fn test_threshold_flush_cancels_timeout() {
        let mut ctx = RecordingContext::new(32);
        let mut batch = strategy(3, Some(100));

        for at in [10, 20, 30] {
            ctx.now = at;
            let message = ctx.new_message(Direction::Request);
            batch.on_incoming_network_message(&mut ctx, message).unwrap();
        }

        assert_eq!(ctx.sent.len(), 3);
        assert!(ctx.sent.iter().all(|(at, _)| *at == 30));
        assert_eq!(ctx.canceled.len(), 1);
        assert_eq!(ctx.pending_timers(), 0);

        ctx.advance_to(&mut batch, 500).unwrap();
        assert_eq!(ctx.sent.len(), 3);
        assert_eq!(
            ctx.statistics.result(StatisticType::BatchSize),
            Some(StatisticValue::Samples(vec![3.0]))
        );
    }

    #[test]
    fn test_timeout_flushes_partial_batch_once() {
        let mut ctx = RecordingContext::new(32);
        let mut batch = strategy(5, Some(100));

        for at in [10, 40] {
            ctx.now = at;
            let message = ctx.new_message(Direction::Request);
            batch.on_incoming_network_message(&mut ctx, message).unwrap();
        }
        ctx.advance_to(&mut batch, 1000).unwrap();

        assert_eq!(ctx.sent.len(), 2);
        assert!(ctx.sent.iter().all(|(at, _)| *at == 110));
        assert_eq!(batch.batched(Direction::Request), 0);
    }

    #[test]
    fn test_requests_and_replies_batched_separately() {
        let mut ctx = RecordingContext::new(32);
        let mut batch = strategy(2, None);

        let request = ctx.new_message(Direction::Request);
        batch.on_incoming_network_message(&mut ctx, request).unwrap();
        let reply = ctx.new_message(Direction::Reply);
        batch.on_incoming_network_message(&mut ctx, reply).unwrap();

        assert!(ctx.sent.is_empty());
        assert_eq!(batch.batched(Direction::Request), 1);
        assert_eq!(batch.batched(Direction::Reply), 1);
        assert_eq!(ctx.pending_timers(), 0);
    }

    #[test]
    fn test_release_order_is_canonical() {
        let mut forward_ctx = RecordingContext::new(32);
        let mut reverse_ctx = RecordingContext::new(32);
        let messages: Vec<Message> = (0..4)
            .map(|_| forward_ctx.new_message(Direction::Request))
            .collect();

        let mut first = strategy(4, None);
        for message in messages.iter().cloned() {
            first
                .on_incoming_network_message(&mut forward_ctx, message)
                .unwrap();
        }
        let mut second = strategy(4, None);
        for message in messages.iter().rev().cloned() {
            second
                .on_incoming_network_message(&mut reverse_ctx, message)
                .unwrap();
        }

        let order = |ctx: &RecordingContext| -> Vec<_> {
            ctx.sent.iter().map(|(_, m)| m.id()).collect()
        };
        assert_eq!(order(&forward_ctx), order(&reverse_ctx));
    }

    #[test]
    fn test_unexpected_timer_kind_rejected() {
        let mut ctx = RecordingContext::new(32);
        let mut batch = strategy(2, Some(10));
        let result = batch.on_timer_fired(
            &mut ctx,
            FiredTimer {
                handle: TimerHandle(1),
                kind: TimerKind::SendTick,
                attachment: None,
            },
        );
        assert!(matches!(result, Err(StrategyError::UnexpectedTimer { .. })));
    }
}
