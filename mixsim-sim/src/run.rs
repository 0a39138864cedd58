//! One simulation run: topology, strategies and the event loop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use mixsim_core::SimTime;
use mixsim_core::config::{EndCondition, MixSimConfig, MixStrategyConfig, StopAndGoConfig};
use mixsim_core::message::{Direction, IdAllocator, Message, MessageId, ParticipantId};
use mixsim_core::statistics::{StatisticType, StatisticsRegistry};
use mixsim_core::strategy::{
    ClientStrategy, FiredTimer, MixStrategy, Strategy, StrategyContext, StrategyError, TimerHandle,
    TimerKind, stamp_hop_headers,
};
use rand::RngCore;

use crate::SimulationError;
use crate::deterministic::{
    Attachment, DeterministicRng, Event, EventId, EventKind, EventTarget, Scheduler,
};
use crate::network::{Network, Topology};
use crate::traffic::{SyntheticTraffic, TrafficSource};

/// Why a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No events were left
    QueueEmpty,
    /// The simulated time limit was reached
    SimulatedTimeReached,
    /// Every client finished its trace and the drain period elapsed
    TraceExhausted,
    /// The wall-clock budget ran out
    WallClockExceeded,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seed: u64,
    pub statistics: StatisticsRegistry,
    /// Simulated time at which the run ended (ms)
    pub simulated_duration: SimTime,
    pub events_processed: u64,
    pub stop_reason: StopReason,
    pub number_of_clients: usize,
    pub number_of_mixes: usize,
}

/// State shared by every participant of a run.
struct World {
    scheduler: Scheduler,
    rng: DeterministicRng,
    ids: IdAllocator,
    statistics: StatisticsRegistry,
    network: Network,
    capacity: usize,
    duplex: bool,
    stop_and_go: Option<StopAndGoConfig>,
    /// Reply id to creation time of the request it answers
    pending_replies: HashMap<MessageId, SimTime>,
}

impl World {
    fn stamp(&mut self, message: &mut Message) -> Result<(), StrategyError> {
        let Some(config) = &self.stop_and_go else {
            return Ok(());
        };
        let mix_hops = self.network.topology().mixes().len();
        let now = self.scheduler.now();
        stamp_hop_headers(config, message, mix_hops, now, &mut self.rng)
    }

    fn transmit(&mut self, message: Message) -> Result<(), SimulationError> {
        self.network
            .transmit(&mut self.scheduler, &mut self.rng, message, 0)
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Client,
    Mix,
}

/// Strategy context handed to one participant for one callback.
struct SimContext<'a> {
    owner: ParticipantId,
    role: Role,
    world: &'a mut World,
}

impl SimContext<'_> {
    fn target(&self) -> EventTarget {
        match self.role {
            Role::Client => EventTarget::Client(self.owner),
            Role::Mix => EventTarget::Mix(self.owner),
        }
    }

    fn create(&mut self, direction: Direction, dummy: bool) -> Message {
        let id = self.world.ids.next_message();
        let destination = self.world.network.topology().destination();
        let (capacity, now) = (self.world.capacity, self.world.scheduler.now());
        if dummy {
            Message::dummy(id, self.owner, destination, direction, capacity, now)
        } else {
            Message::new(id, self.owner, destination, direction, capacity, now)
        }
    }
}

impl StrategyContext for SimContext<'_> {
    fn now(&self) -> SimTime {
        self.world.scheduler.now()
    }

    fn owner(&self) -> ParticipantId {
        self.owner
    }

    fn new_message(&mut self, direction: Direction) -> Message {
        self.create(direction, false)
    }

    fn new_dummy(&mut self, direction: Direction) -> Message {
        self.create(direction, true)
    }

    fn schedule_timer(
        &mut self,
        at: SimTime,
        kind: TimerKind,
        attachment: Option<Message>,
    ) -> Result<TimerHandle, StrategyError> {
        let target = self.target();
        self.world
            .scheduler
            .schedule(
                at,
                target,
                EventKind::Timer(kind),
                attachment.map(Attachment::Message),
            )
            .map(TimerHandle::from)
            .map_err(|e| StrategyError::Scheduling {
                reason: e.to_string(),
            })
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.world.scheduler.cancel(EventId::from(handle));
    }

    fn send(&mut self, mut message: Message) -> Result<(), StrategyError> {
        if let Role::Client = self.role {
            if message.route().is_empty() {
                let route = self.world.network.topology().request_route();
                message.assign_route(route);
            }
            self.world.stamp(&mut message)?;

            let now = self.world.scheduler.now();
            let statistics = &mut self.world.statistics;
            statistics.record(StatisticType::MessagesSent, 1.0, now);
            if message.is_dummy() {
                statistics.record(StatisticType::DummyMessagesSent, 1.0, now);
            }
        }

        tracing::debug!("{} sends {}", self.owner, message.id());
        self.world
            .transmit(message)
            .map_err(|e| StrategyError::Scheduling {
                reason: e.to_string(),
            })
    }

    fn record(&mut self, statistic: StatisticType, value: f64) {
        let now = self.world.scheduler.now();
        self.world.statistics.record(statistic, value, now);
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.world.rng
    }
}

/// A single, fully isolated simulation run.
///
/// Owns every piece of mutable state it touches. Two runs built from the
/// same configuration and seed process the same events in the same order.
pub struct SimulationRun {
    world: World,
    traffic: SyntheticTraffic,
    clients: BTreeMap<ParticipantId, ClientStrategy>,
    mixes: BTreeMap<ParticipantId, MixStrategy>,
    end_condition: EndCondition,
    drain_period: SimTime,
    finished_traces: BTreeSet<ParticipantId>,
    stop_reason: Option<StopReason>,
    events_processed: u64,
}

impl SimulationRun {
    /// Builds the topology, traffic source and strategies of a run.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - The configuration failed validation
    pub fn new(config: &MixSimConfig, seed: u64) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut ids = IdAllocator::new();
        let mut traffic = SyntheticTraffic::new(config.traffic.clone());
        let client_ids = traffic.create_participants(&mut ids, config.topology.clients);
        let mix_ids: Vec<ParticipantId> = (0..config.topology.mixes)
            .map(|_| ids.next_participant())
            .collect();
        let destination = ids.next_participant();

        let clients = client_ids
            .iter()
            .map(|id| (*id, ClientStrategy::from_style(&config.client)))
            .collect();
        let mixes = mix_ids
            .iter()
            .map(|id| (*id, MixStrategy::from_config(&config.mix)))
            .collect();

        let topology = Topology::new(client_ids, mix_ids, destination);
        let network = Network::new(
            topology,
            config.topology.min_link_delay,
            config.topology.max_link_delay,
        );
        let stop_and_go = match &config.mix {
            MixStrategyConfig::StopAndGo(stop_and_go) => Some(stop_and_go.clone()),
            _ => None,
        };

        tracing::debug!(
            "Run seed={} with {} clients ({}) and {} mixes ({})",
            seed,
            config.topology.clients,
            config.client.name(),
            config.topology.mixes,
            config.mix.name()
        );

        Ok(Self {
            world: World {
                scheduler: Scheduler::new(),
                rng: DeterministicRng::from_seed(seed),
                ids,
                statistics: StatisticsRegistry::new(config.simulation.statistics_start),
                network,
                capacity: config.message.capacity,
                duplex: config.topology.duplex,
                stop_and_go,
                pending_replies: HashMap::new(),
            },
            traffic,
            clients,
            mixes,
            end_condition: config.simulation.end_condition,
            drain_period: config.simulation.drain_period,
            finished_traces: BTreeSet::new(),
            stop_reason: None,
            events_processed: 0,
        })
    }

    /// Runs the event loop until the end condition is met.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Strategy` - A strategy hit an invariant violation
    /// - `SimulationError::UnexpectedEvent` - An event reached a target that cannot take it
    /// - `SimulationError::EventInPast` - Scheduler order was violated
    pub fn execute(mut self) -> Result<RunReport, SimulationError> {
        let started = Instant::now();
        let (time_limit, wall_budget) = match self.end_condition {
            EndCondition::SimulatedTime { limit } => (Some(limit), None),
            EndCondition::WallClock { limit } => (None, Some(limit)),
            EndCondition::TraceExhausted => (None, None),
        };

        self.start()?;

        while self.stop_reason.is_none() {
            if wall_budget.is_some_and(|budget| started.elapsed() >= budget) {
                let now = self.world.scheduler.now();
                self.request_stop(StopReason::WallClockExceeded, now);
                break;
            }

            let Some(event) = self.world.scheduler.pop_due(time_limit)? else {
                match time_limit {
                    Some(limit) if !self.world.scheduler.is_empty() => {
                        self.request_stop(StopReason::SimulatedTimeReached, limit);
                    }
                    _ => {
                        let now = self.world.scheduler.now();
                        self.request_stop(StopReason::QueueEmpty, now);
                    }
                }
                break;
            };

            self.events_processed += 1;
            self.dispatch(event)?;
        }

        let stop_reason = self.stop_reason.unwrap_or(StopReason::QueueEmpty);
        let simulated_duration = match stop_reason {
            StopReason::SimulatedTimeReached => time_limit.unwrap_or_default(),
            _ => self.world.scheduler.now(),
        };
        tracing::info!(
            "Run seed={} ended ({:?}) at {} ms after {} events",
            self.world.rng.seed(),
            stop_reason,
            simulated_duration,
            self.events_processed
        );

        Ok(RunReport {
            seed: self.world.rng.seed(),
            statistics: self.world.statistics,
            simulated_duration,
            events_processed: self.events_processed,
            stop_reason,
            number_of_clients: self.clients.len(),
            number_of_mixes: self.mixes.len(),
        })
    }

    fn start(&mut self) -> Result<(), SimulationError> {
        let client_ids: Vec<ParticipantId> = self.clients.keys().copied().collect();
        for id in client_ids {
            self.with_client(id, |strategy, ctx| strategy.on_start(ctx))?;
        }
        let mix_ids: Vec<ParticipantId> = self.mixes.keys().copied().collect();
        for id in mix_ids {
            self.with_mix(id, |strategy, ctx| strategy.on_start(ctx))?;
        }

        self.traffic
            .start_sending(&mut self.world.scheduler, &mut self.world.rng)?;

        // Clients with an empty trace are done before sending anything.
        let client_ids: Vec<ParticipantId> = self.clients.keys().copied().collect();
        for id in client_ids {
            self.vote_if_exhausted(id)?;
        }
        Ok(())
    }

    /// Ends the run. Only the first call has an effect.
    fn request_stop(&mut self, reason: StopReason, at: SimTime) {
        if self.stop_reason.is_some() {
            return;
        }
        self.stop_reason = Some(reason);
        self.world.statistics.finish(at);
    }

    fn dispatch(&mut self, mut event: Event) -> Result<(), SimulationError> {
        tracing::trace!(
            "{} at {} ms: {:?} -> {:?}",
            event.id,
            event.time(),
            event.kind,
            event.target
        );

        match (event.target, event.kind) {
            (EventTarget::Traffic(client), EventKind::TrafficTick) => self.traffic_tick(client),

            (EventTarget::Client(id), EventKind::ApplicationData) => {
                let data = event.take_data().ok_or_else(|| unexpected(&event))?;
                self.with_client(id, |strategy, ctx| {
                    strategy.on_incoming_application_data(ctx, data)
                })
            }

            (EventTarget::Client(id), EventKind::MessageArrival) => {
                let message = event.take_message().ok_or_else(|| unexpected(&event))?;
                if let Some(sent_at) = self.world.pending_replies.remove(&message.id()) {
                    let now = self.world.scheduler.now();
                    self.world.statistics.record(
                        StatisticType::RoundTripTime,
                        (now - sent_at) as f64,
                        now,
                    );
                }
                self.with_client(id, |strategy, ctx| {
                    strategy.on_incoming_network_message(ctx, message)
                })
            }

            (EventTarget::Client(id), EventKind::DeliveryAck) => {
                self.with_client(id, |strategy, ctx| strategy.on_delivery_acknowledged(ctx))
            }

            (EventTarget::Client(id), EventKind::Timer(kind)) => {
                let timer = fired(&mut event, kind);
                self.with_client(id, |strategy, ctx| strategy.on_timer_fired(ctx, timer))
            }

            (EventTarget::Mix(id), EventKind::MessageArrival) => {
                let message = event.take_message().ok_or_else(|| unexpected(&event))?;
                self.with_mix(id, |strategy, ctx| {
                    strategy.on_incoming_network_message(ctx, message)
                })
            }

            (EventTarget::Mix(id), EventKind::Timer(kind)) => {
                let timer = fired(&mut event, kind);
                self.with_mix(id, |strategy, ctx| strategy.on_timer_fired(ctx, timer))
            }

            (EventTarget::Destination, EventKind::MessageArrival) => {
                let message = event.take_message().ok_or_else(|| unexpected(&event))?;
                self.deliver(message)
            }

            (EventTarget::Run, EventKind::Stop) => {
                let now = self.world.scheduler.now();
                self.request_stop(StopReason::TraceExhausted, now);
                Ok(())
            }

            _ => Err(unexpected(&event)),
        }
    }

    fn traffic_tick(&mut self, client: ParticipantId) -> Result<(), SimulationError> {
        let world = &mut self.world;
        let data =
            self.traffic
                .next_tick(client, &mut world.scheduler, &mut world.rng, &mut world.ids)?;
        if let Some(data) = data {
            world.scheduler.schedule_in(
                0,
                EventTarget::Client(client),
                EventKind::ApplicationData,
                Some(Attachment::Data(data)),
            )?;
        }
        self.vote_if_exhausted(client)
    }

    /// Counts `client` as finished once its trace ran out. The last vote
    /// schedules the end of the run after the drain period.
    fn vote_if_exhausted(&mut self, client: ParticipantId) -> Result<(), SimulationError> {
        if !self.traffic.is_exhausted(client) || !self.finished_traces.insert(client) {
            return Ok(());
        }
        if self.finished_traces.len() < self.clients.len() {
            return Ok(());
        }
        if let EndCondition::TraceExhausted = self.end_condition {
            tracing::debug!(
                "All traces exhausted at {} ms, draining for {} ms",
                self.world.scheduler.now(),
                self.drain_period
            );
            self.world
                .scheduler
                .schedule_in(self.drain_period, EventTarget::Run, EventKind::Stop, None)?;
        }
        Ok(())
    }

    /// Destination side: accounts delivered payload, then answers.
    fn deliver(&mut self, request: Message) -> Result<(), SimulationError> {
        if request.direction() != Direction::Request {
            return Err(SimulationError::UnexpectedEvent {
                target: "destination".to_string(),
                kind: format!("reply {}", request.id()),
            });
        }

        let world = &mut self.world;
        let now = world.scheduler.now();
        for object in request.payload() {
            world.statistics.record(
                StatisticType::PayloadBytesDelivered,
                object.len() as f64,
                now,
            );
            if object.completes_parent() {
                world
                    .statistics
                    .record(StatisticType::PayloadsDelivered, 1.0, now);
                world.statistics.record(
                    StatisticType::EndToEndLatency,
                    now.saturating_sub(object.parent_created_at()) as f64,
                    now,
                );
            }
        }

        let client = request.source();
        if world.duplex {
            let destination = world.network.topology().destination();
            let mut reply = Message::dummy(
                world.ids.next_message(),
                destination,
                client,
                Direction::Reply,
                world.capacity,
                now,
            );
            reply.assign_route(world.network.topology().reply_route(&request));
            world
                .stamp(&mut reply)
                .map_err(|source| SimulationError::Strategy {
                    participant: destination,
                    source,
                })?;
            world.pending_replies.insert(reply.id(), request.created_at());
            return world.transmit(reply);
        }

        if let Some(ClientStrategy::WaitForReply(_)) = self.clients.get(&client) {
            let latency = world.network.link_latency(&mut world.rng);
            world.scheduler.schedule_in(
                latency,
                EventTarget::Client(client),
                EventKind::DeliveryAck,
                None,
            )?;
        }
        Ok(())
    }

    fn with_client<F>(&mut self, id: ParticipantId, f: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&mut ClientStrategy, &mut dyn StrategyContext) -> Result<(), StrategyError>,
    {
        let strategy = self
            .clients
            .get_mut(&id)
            .ok_or(SimulationError::UnknownParticipant {
                participant: id,
                context: "client",
            })?;
        let mut ctx = SimContext {
            owner: id,
            role: Role::Client,
            world: &mut self.world,
        };
        f(strategy, &mut ctx).map_err(|source| SimulationError::Strategy {
            participant: id,
            source,
        })
    }

    fn with_mix<F>(&mut self, id: ParticipantId, f: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&mut MixStrategy, &mut dyn StrategyContext) -> Result<(), StrategyError>,
    {
        let strategy = self
            .mixes
            .get_mut(&id)
            .ok_or(SimulationError::UnknownParticipant {
                participant: id,
                context: "mix",
            })?;
        let mut ctx = SimContext {
            owner: id,
            role: Role::Mix,
            world: &mut self.world,
        };
        f(strategy, &mut ctx).map_err(|source| SimulationError::Strategy {
            participant: id,
            source,
        })
    }
}

fn fired(event: &mut Event, kind: TimerKind) -> FiredTimer {
    FiredTimer {
        handle: event.id.into(),
        kind,
        attachment: event.take_message(),
    }
}

fn unexpected(event: &Event) -> SimulationError {
    SimulationError::UnexpectedEvent {
        target: format!("{:?}", event.target),
        kind: format!("{:?}", event.kind),
    }
}

#[cfg(test)]
mod tests {
    use mixsim_core::config::{
        BasicSynchronousConfig, ClientSendStyle, StopAndGoConfig, TrafficModel,
    };

    use super::*;

    fn run(config: &MixSimConfig, seed: u64) -> RunReport {
        SimulationRun::new(config, seed).unwrap().execute().unwrap()
    }

    fn forward_config() -> MixSimConfig {
        let mut config = MixSimConfig::for_testing();
        config.mix = MixStrategyConfig::Forward;
        config
    }

    #[test]
    fn test_every_payload_reaches_destination() {
        let report = run(&forward_config(), 1);

        assert_eq!(report.stop_reason, StopReason::TraceExhausted);
        assert_eq!(report.number_of_clients, 4);
        assert_eq!(report.number_of_mixes, 2);
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            40.0
        );
        assert_eq!(report.statistics.counter(StatisticType::MessagesSent), 40.0);
        // Two mixes and three links of 10 ms each
        let latency = report
            .statistics
            .result(StatisticType::EndToEndLatency)
            .unwrap();
        assert_eq!(latency.mean(), Some(30.0));
    }

    #[test]
    fn test_threshold_batch_delivers_everything() {
        let report = run(&MixSimConfig::for_testing(), 3);
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            40.0
        );
        let batches = report.statistics.result(StatisticType::BatchSize).unwrap();
        assert!(batches.mean().is_some_and(|size| size >= 1.0));
    }

    #[test]
    fn test_same_seed_replays_identically() {
        let mut config = MixSimConfig::for_testing();
        config.topology.min_link_delay = 1;
        config.topology.max_link_delay = 30;
        config.traffic.model = TrafficModel::Poisson { mean_interval: 40 };

        let first = run(&config, 99);
        let second = run(&config, 99);

        assert_eq!(first.events_processed, second.events_processed);
        assert_eq!(first.simulated_duration, second.simulated_duration);
        for statistic in StatisticType::ALL {
            assert_eq!(
                first.statistics.result(statistic),
                second.statistics.result(statistic),
                "{statistic} differs"
            );
        }
    }

    #[test]
    fn test_constant_rate_dummies_until_time_limit() {
        let mut config = forward_config();
        config.traffic.messages_per_client = Some(0);
        config.client = ClientSendStyle::BasicSynchronous(BasicSynchronousConfig { interval: 100 });
        config.simulation.end_condition = EndCondition::SimulatedTime { limit: 1050 };

        let report = run(&config, 5);

        assert_eq!(report.stop_reason, StopReason::SimulatedTimeReached);
        assert_eq!(report.simulated_duration, 1050);
        // floor(1050 / 100) slots for each of the four clients
        assert_eq!(report.statistics.counter(StatisticType::MessagesSent), 40.0);
        assert_eq!(
            report.statistics.counter(StatisticType::DummyMessagesSent),
            40.0
        );
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            0.0
        );
    }

    #[test]
    fn test_queue_runs_dry_before_time_limit() {
        let mut config = forward_config();
        config.simulation.end_condition = EndCondition::SimulatedTime { limit: 1_000_000 };

        let report = run(&config, 5);
        assert_eq!(report.stop_reason, StopReason::QueueEmpty);
        assert!(report.simulated_duration < 1_000_000);
    }

    #[test]
    fn test_duplex_replies_measure_round_trip() {
        let mut config = forward_config();
        config.topology.duplex = true;
        config.client = ClientSendStyle::WaitForReply;

        let report = run(&config, 8);

        let rtt = report
            .statistics
            .result(StatisticType::RoundTripTime)
            .unwrap();
        // Three links out and three links back
        assert_eq!(rtt.mean(), Some(60.0));
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            40.0
        );
    }

    #[test]
    fn test_wait_for_reply_clocked_by_acknowledgements() {
        let mut config = forward_config();
        config.client = ClientSendStyle::WaitForReply;

        let report = run(&config, 8);

        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            40.0
        );
        assert!(
            report
                .statistics
                .result(StatisticType::RoundTripTime)
                .is_some_and(|rtt| rtt.mean().is_none())
        );
    }

    fn stop_and_go(link_delay: SimTime) -> MixSimConfig {
        let mut config = MixSimConfig::for_testing();
        config.topology.min_link_delay = link_delay;
        config.topology.max_link_delay = link_delay;
        config.simulation.drain_period = 5000;
        config.mix = MixStrategyConfig::StopAndGo(StopAndGoConfig {
            mu: 20.0,
            min_inter_mix_delay: 5,
            max_inter_mix_delay: 5,
            max_clock_deviation: 0,
            timestamps_enabled: true,
        });
        config
    }

    #[test]
    fn test_stop_and_go_in_window_delivers() {
        let report = run(&stop_and_go(5), 2);
        assert_eq!(
            report.statistics.counter(StatisticType::DroppedMessages),
            0.0
        );
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            40.0
        );
    }

    #[test]
    fn test_stop_and_go_late_arrivals_are_counted() {
        let report = run(&stop_and_go(50), 2);
        assert_eq!(
            report.statistics.counter(StatisticType::DroppedMessages),
            40.0
        );
        assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            0.0
        );
    }

    #[test]
    fn test_invalid_config_rejected_at_start() {
        let mut config = MixSimConfig::for_testing();
        config.topology.clients = 0;
        assert!(matches!(
            SimulationRun::new(&config, 1),
            Err(SimulationError::Config(_))
        ));
    }
}
