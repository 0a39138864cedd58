//! Actor implementation for live nodes.

use std::collections::HashMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};

use super::LiveNodeConfig;
use super::commands::LiveNodeCommand;
use super::handle::LiveNodeHandle;
use crate::SimTime;
use crate::message::{Direction, IdAllocator, Message, ParticipantId, Route};
use crate::statistics::{StatisticType, StatisticsRegistry};
use crate::strategy::{
    FiredTimer, Strategy, StrategyContext, StrategyError, TimerHandle, TimerKind,
    stamp_hop_headers,
};

/// Spawns a live node actor driving `strategy` and returns its handle.
///
/// `on_start` runs inside the actor before the first command is processed.
/// Messages the strategy sends are forwarded to `outbound`; the actor
/// waits for channel capacity before taking the next input, so a slow
/// consumer throttles the node.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use mixsim_core::live::{LiveNodeConfig, spawn_live_node};
/// use mixsim_core::strategy::ImmediateSend;
/// use tokio::sync::mpsc;
///
/// let (outbound, mut network) = mpsc::channel(16);
/// let node = spawn_live_node(ImmediateSend::new(), LiveNodeConfig::default(), outbound);
/// # let _ = (node, network.try_recv());
/// # }
/// ```
pub fn spawn_live_node<S>(
    strategy: S,
    config: LiveNodeConfig,
    outbound: mpsc::Sender<Message>,
) -> LiveNodeHandle
where
    S: Strategy + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(config.command_buffer.max(1));
    let (fired_sender, fired_receiver) = mpsc::unbounded_channel();
    let ctx = LiveContext::new(config, fired_sender, outbound);

    tokio::spawn(async move {
        run_actor_loop(strategy, ctx, receiver, fired_receiver).await;
    });

    LiveNodeHandle::new(sender)
}

/// Strategy context backed by the tokio clock.
struct LiveContext {
    config: LiveNodeConfig,
    started: Instant,
    ids: IdAllocator,
    statistics: StatisticsRegistry,
    rng: ChaCha8Rng,
    timers: HashMap<TimerHandle, AbortHandle>,
    next_timer: u64,
    fired: mpsc::UnboundedSender<FiredTimer>,
    outbound: mpsc::Sender<Message>,
    outbox: Vec<Message>,
}

impl LiveContext {
    fn new(
        config: LiveNodeConfig,
        fired: mpsc::UnboundedSender<FiredTimer>,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            started: Instant::now(),
            ids: IdAllocator::new(),
            statistics: StatisticsRegistry::new(0),
            timers: HashMap::new(),
            next_timer: 0,
            fired,
            outbound,
            outbox: Vec::new(),
        }
    }

    /// Forwards everything the last strategy call sent, waiting for capacity.
    async fn flush_outbox(&mut self) -> Result<(), StrategyError> {
        for message in std::mem::take(&mut self.outbox) {
            self.outbound
                .send(message)
                .await
                .map_err(|_| StrategyError::TransportClosed)?;
        }
        Ok(())
    }

    /// Claims a fired timer. Returns false for timers canceled after firing.
    fn claim(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    fn abort_all_timers(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }

    fn create(&mut self, direction: Direction, dummy: bool) -> Message {
        let id = self.ids.next_message();
        let (owner, destination, capacity, now) = (
            self.config.owner,
            self.config.destination,
            self.config.capacity,
            self.now(),
        );
        if dummy {
            Message::dummy(id, owner, destination, direction, capacity, now)
        } else {
            Message::new(id, owner, destination, direction, capacity, now)
        }
    }
}

impl StrategyContext for LiveContext {
    fn now(&self) -> SimTime {
        self.started.elapsed().as_millis() as SimTime
    }

    fn owner(&self) -> ParticipantId {
        self.config.owner
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
        let now = self.now();
        if at < now {
            return Err(StrategyError::Scheduling {
                reason: format!("deadline {at} ms is before now ({now} ms)"),
            });
        }

        let handle = TimerHandle(self.next_timer);
        self.next_timer += 1;

        let deadline = self.started + Duration::from_millis(at);
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = fired.send(FiredTimer {
                handle,
                kind,
                attachment,
            });
        });
        self.timers.insert(handle, task.abort_handle());
        Ok(handle)
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        if let Some(task) = self.timers.remove(&handle) {
            task.abort();
        }
    }

    fn send(&mut self, mut message: Message) -> Result<(), StrategyError> {
        if self.outbound.is_closed() {
            return Err(StrategyError::TransportClosed);
        }
        let now = self.now();
        if message.route().is_empty() && !self.config.route.is_empty() {
            message.assign_route(Route::new(self.config.route.clone()));
            if let Some(stop_and_go) = &self.config.stop_and_go {
                let mix_hops = self.config.route.len().saturating_sub(1);
                stamp_hop_headers(stop_and_go, &mut message, mix_hops, now, &mut self.rng)?;
            }
        }
        // Outbound messages move to their next hop, as on the simulated network
        message.route_mut().advance();

        self.statistics
            .record(StatisticType::MessagesSent, 1.0, now);
        if message.is_dummy() {
            self.statistics
                .record(StatisticType::DummyMessagesSent, 1.0, now);
        }
        self.outbox.push(message);
        Ok(())
    }

    fn record(&mut self, statistic: StatisticType, value: f64) {
        let now = self.now();
        self.statistics.record(statistic, value, now);
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Runs the node until shutdown, a closed command channel, or a fatal
/// strategy error.
async fn run_actor_loop<S>(
    mut strategy: S,
    mut ctx: LiveContext,
    mut receiver: mpsc::Receiver<LiveNodeCommand>,
    mut fired_receiver: mpsc::UnboundedReceiver<FiredTimer>,
) where
    S: Strategy + Send + 'static,
{
    let owner = ctx.config.owner;
    tracing::debug!("Live node {} ({}) started", owner, strategy.name());

    let outcome = strategy.on_start(&mut ctx);
    if let Err(e) = settle(&mut ctx, outcome).await {
        tracing::error!("Live node {} failed to start: {}", owner, e);
        ctx.abort_all_timers();
        return;
    }

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    tracing::debug!("Live node {} lost every handle", owner);
                    break;
                };
                if !dispatch_command(&mut strategy, &mut ctx, command).await {
                    break;
                }
            }
            Some(timer) = fired_receiver.recv() => {
                if !ctx.claim(timer.handle) {
                    tracing::trace!("Live node {} ignoring canceled {}", owner, timer.handle);
                    continue;
                }
                let outcome = strategy.on_timer_fired(&mut ctx, timer);
                if let Err(e) = settle(&mut ctx, outcome).await {
                    tracing::error!("Live node {} stopped on timer: {}", owner, e);
                    break;
                }
            }
        }
    }

    ctx.abort_all_timers();
    tracing::debug!("Live node {} stopped", owner);
}

/// Applies one command. Returns true to continue processing, false to stop.
async fn dispatch_command<S>(
    strategy: &mut S,
    ctx: &mut LiveContext,
    command: LiveNodeCommand,
) -> bool
where
    S: Strategy + Send + 'static,
{
    match command {
        LiveNodeCommand::ApplicationData { data, responder } => {
            let outcome = strategy.on_incoming_application_data(ctx, data);
            let result = settle(ctx, outcome).await;
            let fatal = result.is_err();
            let _ = responder.send(result);
            !fatal
        }

        LiveNodeCommand::NetworkMessage { message, responder } => {
            let outcome = strategy.on_incoming_network_message(ctx, message);
            let result = settle(ctx, outcome).await;
            let fatal = result.is_err();
            let _ = responder.send(result);
            !fatal
        }

        LiveNodeCommand::Statistics { responder } => {
            let _ = responder.send(ctx.statistics.clone());
            true
        }

        LiveNodeCommand::Shutdown { responder } => {
            tracing::debug!("Live node {} shutting down", ctx.config.owner);
            ctx.abort_all_timers();
            let _ = responder.send(());
            false
        }
    }
}

/// Forwards pending sends, then reports the strategy outcome.
async fn settle(
    ctx: &mut LiveContext,
    outcome: Result<(), StrategyError>,
) -> Result<(), StrategyError> {
    let flushed = ctx.flush_outbox().await;
    outcome.and(flushed)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::time::timeout;

    use super::*;
    use crate::MixSimError;
    use crate::config::WaitForDataConfig;
    use crate::message::{TransportMessage, TransportMessageId};
    use crate::strategy::{Forward, ImmediateSend, WaitForData};

    fn data(id: u64, len: usize) -> TransportMessage {
        TransportMessage::new(
            TransportMessageId(id),
            ParticipantId(0),
            0,
            Bytes::from(vec![7u8; len]),
        )
    }

    fn config(capacity: usize) -> LiveNodeConfig {
        LiveNodeConfig {
            capacity,
            ..LiveNodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_immediate_node_fragments_into_outbound_channel() {
        let (outbound, mut network) = mpsc::channel(8);
        let node = spawn_live_node(ImmediateSend::new(), config(64), outbound);

        tokio_test::assert_ok!(node.submit_application_data(data(1, 100)).await);

        let first = network.recv().await.unwrap();
        let second = network.recv().await.unwrap();
        assert_eq!(first.used_space(), 64);
        assert_eq!(second.used_space(), 36);
        assert!(second.payload()[0].completes_parent());

        let statistics = node.statistics().await.unwrap();
        assert_eq!(statistics.counter(StatisticType::MessagesSent), 2.0);
    }

    #[tokio::test]
    async fn test_wait_for_data_flushes_on_real_timer() {
        let (outbound, mut network) = mpsc::channel(8);
        let strategy = WaitForData::new(&WaitForDataConfig { timeout: 20 });
        let node = spawn_live_node(strategy, config(64), outbound);

        node.submit_application_data(data(1, 10)).await.unwrap();
        assert!(network.try_recv().is_err());

        let message = timeout(Duration::from_secs(5), network.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.used_space(), 10);
        assert!(!message.is_dummy());
    }

    #[tokio::test]
    async fn test_strategy_error_reaches_caller_and_stops_node() {
        let (outbound, _network) = mpsc::channel(8);
        let node = spawn_live_node(Forward, config(64), outbound);

        let result = node.submit_application_data(data(1, 10)).await;
        assert!(matches!(
            result,
            Err(MixSimError::Strategy(StrategyError::UnexpectedInput { .. }))
        ));

        tokio_test::assert_err!(node.statistics().await);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_commands() {
        let (outbound, _network) = mpsc::channel(8);
        let node = spawn_live_node(ImmediateSend::new(), config(64), outbound);

        node.shutdown().await.unwrap();
        let result = node.submit_application_data(data(1, 10)).await;
        assert!(matches!(result, Err(MixSimError::LiveNode { .. })));
    }

    #[tokio::test]
    async fn test_closed_transport_is_reported() {
        let (outbound, network) = mpsc::channel(8);
        drop(network);
        let node = spawn_live_node(ImmediateSend::new(), config(64), outbound);

        let result = node.submit_application_data(data(1, 10)).await;
        assert!(matches!(
            result,
            Err(MixSimError::Strategy(StrategyError::TransportClosed))
        ));
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_node() {
        let (outbound, mut network) = mpsc::channel(8);
        let strategy = WaitForData::new(&WaitForDataConfig { timeout: 60_000 });
        let node = spawn_live_node(strategy, config(64), outbound);

        node.submit_application_data(data(1, 10)).await.unwrap();
        drop(node);

        let closed = timeout(Duration::from_secs(5), network.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
