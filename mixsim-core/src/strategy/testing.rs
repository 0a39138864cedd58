//! In-memory strategy context for unit tests.

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{FiredTimer, Strategy, StrategyContext, StrategyError, TimerHandle, TimerKind};
use crate::SimTime;
use crate::message::{
    Direction, Message, MessageId, ParticipantId, TransportMessage, TransportMessageId,
};
use crate::statistics::{StatisticType, StatisticsRegistry};

const DESTINATION: ParticipantId = ParticipantId(99);

/// Records everything a strategy does and lets tests advance time by
/// firing timers in order.
pub(crate) struct RecordingContext {
    pub now: SimTime,
    pub capacity: usize,
    pub sent: Vec<(SimTime, Message)>,
    pub canceled: Vec<TimerHandle>,
    pub statistics: StatisticsRegistry,
    timers: BTreeMap<(SimTime, u64), (TimerKind, Option<Message>)>,
    next_id: u64,
    rng: ChaCha8Rng,
}

impl RecordingContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            now: 0,
            capacity,
            sent: Vec::new(),
            canceled: Vec::new(),
            statistics: StatisticsRegistry::new(0),
            timers: BTreeMap::new(),
            next_id: 0,
            rng: ChaCha8Rng::seed_from_u64(7),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn transport(&mut self, len: usize) -> TransportMessage {
        let id = self.next_id();
        TransportMessage::new(
            TransportMessageId(id),
            ParticipantId(1),
            self.now,
            Bytes::from(vec![id as u8; len]),
        )
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_timer_at(&self) -> Option<SimTime> {
        self.timers.keys().next().map(|(at, _)| *at)
    }

    /// Fires the earliest pending timer into `strategy`.
    pub fn fire_next(&mut self, strategy: &mut dyn Strategy) -> Result<bool, StrategyError> {
        let Some(((at, id), (kind, attachment))) = self.timers.pop_first() else {
            return Ok(false);
        };
        self.now = at;
        strategy.on_timer_fired(
            self,
            FiredTimer {
                handle: TimerHandle(id),
                kind,
                attachment,
            },
        )?;
        Ok(true)
    }

    /// Fires every timer due at or before `until`, then moves the clock there.
    pub fn advance_to(
        &mut self,
        strategy: &mut dyn Strategy,
        until: SimTime,
    ) -> Result<(), StrategyError> {
        while self.next_timer_at().is_some_and(|at| at <= until) {
            self.fire_next(strategy)?;
        }
        self.now = until;
        Ok(())
    }
}

impl StrategyContext for RecordingContext {
    fn now(&self) -> SimTime {
        self.now
    }

    fn owner(&self) -> ParticipantId {
        ParticipantId(1)
    }

    fn new_message(&mut self, direction: Direction) -> Message {
        let id = self.next_id();
        Message::new(
            MessageId(id),
            ParticipantId(1),
            DESTINATION,
            direction,
            self.capacity,
            self.now,
        )
    }

    fn new_dummy(&mut self, direction: Direction) -> Message {
        let id = self.next_id();
        Message::dummy(
            MessageId(id),
            ParticipantId(1),
            DESTINATION,
            direction,
            self.capacity,
            self.now,
        )
    }

    fn schedule_timer(
        &mut self,
        at: SimTime,
        kind: TimerKind,
        attachment: Option<Message>,
    ) -> Result<TimerHandle, StrategyError> {
        if at < self.now {
            return Err(StrategyError::Scheduling {
                reason: format!("{at} is before {}", self.now),
            });
        }
        let id = self.next_id();
        self.timers.insert((at, id), (kind, attachment));
        Ok(TimerHandle(id))
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.retain(|(_, id), _| *id != handle.0);
        self.canceled.push(handle);
    }

    fn send(&mut self, message: Message) -> Result<(), StrategyError> {
        self.sent.push((self.now, message));
        Ok(())
    }

    fn record(&mut self, statistic: StatisticType, value: f64) {
        self.statistics.record(statistic, value, self.now);
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}
