//! Application traffic generation.

use std::collections::BTreeMap;

use bytes::Bytes;
use mixsim_core::SimTime;
use mixsim_core::config::{TrafficConfig, TrafficModel};
use mixsim_core::message::{IdAllocator, ParticipantId, TransportMessage};

use crate::SimulationError;
use crate::deterministic::{DeterministicRng, EventKind, EventTarget, Scheduler};

/// Source of application data for the clients of a run.
pub trait TrafficSource {
    /// Allocates the clients this source feeds.
    fn create_participants(&mut self, ids: &mut IdAllocator, count: usize) -> Vec<ParticipantId>;

    /// Schedules the first traffic tick of every client.
    ///
    /// # Errors
    ///
    /// - `SimulationError::EventInPast` - A tick would precede the current time
    fn start_sending(
        &mut self,
        scheduler: &mut Scheduler,
        rng: &mut DeterministicRng,
    ) -> Result<(), SimulationError>;

    /// Produces the data of the tick that just fired for `client` and
    /// schedules the following tick while the trace continues.
    ///
    /// Returns `None` once the client's trace is exhausted.
    ///
    /// # Errors
    ///
    /// - `SimulationError::EventInPast` - A tick would precede the current time
    fn next_tick(
        &mut self,
        client: ParticipantId,
        scheduler: &mut Scheduler,
        rng: &mut DeterministicRng,
        ids: &mut IdAllocator,
    ) -> Result<Option<TransportMessage>, SimulationError>;

    /// Whether `client` has sent its whole trace.
    fn is_exhausted(&self, client: ParticipantId) -> bool;
}

/// Synthetic trace: constant-rate or Poisson arrivals with uniform sizes.
#[derive(Debug, Clone)]
pub struct SyntheticTraffic {
    config: TrafficConfig,
    sent: BTreeMap<ParticipantId, u64>,
}

impl SyntheticTraffic {
    pub fn new(config: TrafficConfig) -> Self {
        Self {
            config,
            sent: BTreeMap::new(),
        }
    }

    fn gap(&self, rng: &mut DeterministicRng) -> SimTime {
        match self.config.model {
            TrafficModel::ConstantRate { interval } => interval,
            TrafficModel::Poisson { mean_interval } => {
                rng.exponential(mean_interval as f64).round() as SimTime
            }
        }
    }

    fn payload(&self, rng: &mut DeterministicRng, client: ParticipantId) -> Bytes {
        let len = rng.random_range(self.config.min_payload as u64, self.config.max_payload as u64);
        Bytes::from(vec![client.0 as u8; len as usize])
    }

    fn sent_by(&self, client: ParticipantId) -> u64 {
        self.sent.get(&client).copied().unwrap_or(0)
    }
}

impl TrafficSource for SyntheticTraffic {
    fn create_participants(&mut self, ids: &mut IdAllocator, count: usize) -> Vec<ParticipantId> {
        let clients: Vec<ParticipantId> = (0..count).map(|_| ids.next_participant()).collect();
        for client in &clients {
            self.sent.insert(*client, 0);
        }
        clients
    }

    fn start_sending(
        &mut self,
        scheduler: &mut Scheduler,
        rng: &mut DeterministicRng,
    ) -> Result<(), SimulationError> {
        let clients: Vec<ParticipantId> = self.sent.keys().copied().collect();
        for client in clients {
            if self.is_exhausted(client) {
                continue;
            }
            let gap = self.gap(rng);
            scheduler.schedule_in(gap, EventTarget::Traffic(client), EventKind::TrafficTick, None)?;
        }
        tracing::debug!("Traffic started for {} clients", self.sent.len());
        Ok(())
    }

    fn next_tick(
        &mut self,
        client: ParticipantId,
        scheduler: &mut Scheduler,
        rng: &mut DeterministicRng,
        ids: &mut IdAllocator,
    ) -> Result<Option<TransportMessage>, SimulationError> {
        if self.is_exhausted(client) {
            return Ok(None);
        }

        let data = TransportMessage::new(
            ids.next_transport(),
            client,
            scheduler.now(),
            self.payload(rng, client),
        );
        *self.sent.entry(client).or_insert(0) += 1;

        if !self.is_exhausted(client) {
            let gap = self.gap(rng);
            scheduler.schedule_in(gap, EventTarget::Traffic(client), EventKind::TrafficTick, None)?;
        }
        Ok(Some(data))
    }

    fn is_exhausted(&self, client: ParticipantId) -> bool {
        self.config
            .messages_per_client
            .is_some_and(|limit| self.sent_by(client) >= limit)
    }
}
