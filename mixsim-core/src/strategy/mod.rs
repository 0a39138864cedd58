//! Send and mix strategies.
//!
//! A strategy is a small state machine deciding *when* a participant emits
//! messages. Strategies never own a clock or a queue: everything that
//! involves time goes through [`StrategyContext`], which the deterministic
//! simulator and the real-time driver in [`crate::live`] both implement.
//! The same strategy value therefore runs unchanged in either regime.

mod basic_synchronous;
mod forward;
mod immediate;
mod stop_and_go;
mod threshold_batch;
mod wait_for_data;
mod wait_for_reply;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use rand::RngCore;

pub use basic_synchronous::BasicSynchronous;
pub use forward::Forward;
pub use immediate::ImmediateSend;
pub use stop_and_go::{StopAndGo, stamp_hop_headers};
pub use threshold_batch::ThresholdBatch;
pub use wait_for_data::WaitForData;
pub use wait_for_reply::WaitForReply;

use crate::SimTime;
use crate::config::{ClientSendStyle, MixStrategyConfig};
use crate::message::{Direction, Message, MessageError, MessageId, ParticipantId, TransportMessage};
use crate::statistics::StatisticType;

/// Opaque reference to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Purpose of a strategy timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Constant-rate send slot
    SendTick,
    /// Partially filled message must go out
    FlushTimeout,
    /// Batch for the given direction must be released
    BatchTimeout(Direction),
    /// Held message must be forwarded
    Release,
}

/// Timer delivered back to the strategy that scheduled it.
#[derive(Debug, Clone)]
pub struct FiredTimer {
    pub handle: TimerHandle,
    pub kind: TimerKind,
    pub attachment: Option<Message>,
}

/// Fatal strategy failures. Each one means a strategy is wired incorrectly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("{strategy} received unexpected timer {kind:?}")]
    UnexpectedTimer {
        strategy: &'static str,
        kind: TimerKind,
    },

    #[error("{strategy} received unexpected input: {input}")]
    UnexpectedInput {
        strategy: &'static str,
        input: &'static str,
    },

    #[error("{strategy} already has an outstanding timeout")]
    DuplicateTimeout { strategy: &'static str },

    #[error("{strategy} was not waiting for {handle}")]
    StaleTimer {
        strategy: &'static str,
        handle: TimerHandle,
    },

    #[error("Message {message} has not reached any hop of its route")]
    NotOnRoute { message: MessageId },

    #[error("Message {message} has no header for hop {hop}")]
    MissingHopHeader { message: MessageId, hop: usize },

    #[error("Release timer fired without a message")]
    MissingAttachment,

    #[error("Invalid strategy parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Scheduling failed: {reason}")]
    Scheduling { reason: String },

    #[error("Outbound transport closed")]
    TransportClosed,

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Capabilities a strategy needs from whoever drives it.
pub trait StrategyContext {
    /// Current time in milliseconds.
    fn now(&self) -> SimTime;

    /// Participant the strategy belongs to.
    fn owner(&self) -> ParticipantId;

    /// Fresh empty message of the configured capacity.
    fn new_message(&mut self, direction: Direction) -> Message;

    /// Fresh dummy message of the configured capacity.
    fn new_dummy(&mut self, direction: Direction) -> Message;

    /// Schedules a timer that fires back into the strategy at `at`.
    ///
    /// # Errors
    ///
    /// - `StrategyError::Scheduling` - `at` lies in the past
    fn schedule_timer(
        &mut self,
        at: SimTime,
        kind: TimerKind,
        attachment: Option<Message>,
    ) -> Result<TimerHandle, StrategyError>;

    /// Cancels a pending timer. Unknown or already fired timers are ignored.
    fn cancel_timer(&mut self, handle: TimerHandle);

    /// Hands a message to the transport towards its next hop.
    ///
    /// # Errors
    ///
    /// - `StrategyError::TransportClosed` - Nobody accepts outbound messages
    fn send(&mut self, message: Message) -> Result<(), StrategyError>;

    /// Records a statistic observation at the current time.
    fn record(&mut self, statistic: StatisticType, value: f64);

    /// Random source owned by the run or node.
    fn rng(&mut self) -> &mut dyn RngCore;
}

/// Common capability set of every send and mix strategy.
///
/// Default methods reject the input: a strategy only accepts what it was
/// built for, anything else is a wiring bug.
pub trait Strategy {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Called once before any traffic is delivered.
    ///
    /// # Errors
    ///
    /// - `StrategyError::Scheduling` - An initial timer could not be scheduled
    /// - `StrategyError::TransportClosed` - An initial message could not be sent
    fn on_start(&mut self, _ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Application data submitted by the local user.
    ///
    /// # Errors
    ///
    /// - `StrategyError::UnexpectedInput` - The strategy does not accept application data
    fn on_incoming_application_data(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        _data: TransportMessage,
    ) -> Result<(), StrategyError> {
        Err(StrategyError::UnexpectedInput {
            strategy: self.name(),
            input: "application data",
        })
    }

    /// Message received from the network.
    ///
    /// # Errors
    ///
    /// - `StrategyError::UnexpectedInput` - The strategy does not accept this message
    fn on_incoming_network_message(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        _message: Message,
    ) -> Result<(), StrategyError> {
        Err(StrategyError::UnexpectedInput {
            strategy: self.name(),
            input: "network message",
        })
    }

    /// Lower-layer notice that an earlier request reached the destination.
    ///
    /// # Errors
    ///
    /// - `StrategyError::UnexpectedInput` - The strategy is not reply-clocked
    fn on_delivery_acknowledged(
        &mut self,
        _ctx: &mut dyn StrategyContext,
    ) -> Result<(), StrategyError> {
        Err(StrategyError::UnexpectedInput {
            strategy: self.name(),
            input: "delivery acknowledgement",
        })
    }

    /// A timer scheduled by this strategy fired.
    ///
    /// # Errors
    ///
    /// - `StrategyError::UnexpectedTimer` - The strategy never schedules this kind
    fn on_timer_fired(
        &mut self,
        _ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        Err(StrategyError::UnexpectedTimer {
            strategy: self.name(),
            kind: timer.kind,
        })
    }
}

/// Arms the single outstanding timeout of a strategy.
///
/// # Errors
///
/// - `StrategyError::DuplicateTimeout` - `slot` already holds a timer
/// - `StrategyError::Scheduling` - The context refused the timer
pub fn arm_timeout(
    slot: &mut Option<TimerHandle>,
    ctx: &mut dyn StrategyContext,
    at: SimTime,
    kind: TimerKind,
    strategy: &'static str,
) -> Result<(), StrategyError> {
    if slot.is_some() {
        return Err(StrategyError::DuplicateTimeout { strategy });
    }
    *slot = Some(ctx.schedule_timer(at, kind, None)?);
    Ok(())
}

/// Cancels the outstanding timeout, if any.
pub fn disarm_timeout(slot: &mut Option<TimerHandle>, ctx: &mut dyn StrategyContext) {
    if let Some(handle) = slot.take() {
        ctx.cancel_timer(handle);
    }
}

/// Clears `slot` if `timer` is the one it holds.
///
/// # Errors
///
/// - `StrategyError::StaleTimer` - The fired timer is not the outstanding one
pub fn claim_timeout(
    slot: &mut Option<TimerHandle>,
    timer: &FiredTimer,
    strategy: &'static str,
) -> Result<(), StrategyError> {
    if *slot != Some(timer.handle) {
        return Err(StrategyError::StaleTimer {
            strategy,
            handle: timer.handle,
        });
    }
    *slot = None;
    Ok(())
}

/// Replies arriving at a client end their journey there.
fn accept_reply(strategy: &'static str, message: &Message) -> Result<(), StrategyError> {
    match message.direction() {
        Direction::Reply => Ok(()),
        Direction::Request => Err(StrategyError::UnexpectedInput {
            strategy,
            input: "request at client",
        }),
    }
}

/// Send strategy of a client, selected from [`ClientSendStyle`].
#[derive(Debug)]
pub enum ClientStrategy {
    Immediate(ImmediateSend),
    BasicSynchronous(BasicSynchronous),
    WaitForData(WaitForData),
    WaitForReply(WaitForReply),
}

impl ClientStrategy {
    /// Builds the strategy variant matching the configured style.
    pub fn from_style(style: &ClientSendStyle) -> Self {
        match style {
            ClientSendStyle::Immediate => ClientStrategy::Immediate(ImmediateSend::new()),
            ClientSendStyle::BasicSynchronous(config) => {
                ClientStrategy::BasicSynchronous(BasicSynchronous::new(config))
            }
            ClientSendStyle::WaitForData(config) => {
                ClientStrategy::WaitForData(WaitForData::new(config))
            }
            ClientSendStyle::WaitForReply => ClientStrategy::WaitForReply(WaitForReply::new()),
        }
    }

    fn inner(&mut self) -> &mut dyn Strategy {
        match self {
            ClientStrategy::Immediate(strategy) => strategy,
            ClientStrategy::BasicSynchronous(strategy) => strategy,
            ClientStrategy::WaitForData(strategy) => strategy,
            ClientStrategy::WaitForReply(strategy) => strategy,
        }
    }
}

impl Strategy for ClientStrategy {
    fn name(&self) -> &'static str {
        match self {
            ClientStrategy::Immediate(strategy) => strategy.name(),
            ClientStrategy::BasicSynchronous(strategy) => strategy.name(),
            ClientStrategy::WaitForData(strategy) => strategy.name(),
            ClientStrategy::WaitForReply(strategy) => strategy.name(),
        }
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        self.inner().on_start(ctx)
    }

    fn on_incoming_application_data(
        &mut self,
        ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.inner().on_incoming_application_data(ctx, data)
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        self.inner().on_incoming_network_message(ctx, message)
    }

    fn on_delivery_acknowledged(
        &mut self,
        ctx: &mut dyn StrategyContext,
    ) -> Result<(), StrategyError> {
        self.inner().on_delivery_acknowledged(ctx)
    }

    fn on_timer_fired(
        &mut self,
        ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        self.inner().on_timer_fired(ctx, timer)
    }
}

/// Mixing strategy of a mix, selected from [`MixStrategyConfig`].
#[derive(Debug)]
pub enum MixStrategy {
    Forward(Forward),
    ThresholdBatch(ThresholdBatch),
    StopAndGo(StopAndGo),
}

impl MixStrategy {
    /// Builds the strategy variant matching the configuration.
    pub fn from_config(config: &MixStrategyConfig) -> Self {
        match config {
            MixStrategyConfig::Forward => MixStrategy::Forward(Forward),
            MixStrategyConfig::ThresholdBatch(config) => {
                MixStrategy::ThresholdBatch(ThresholdBatch::new(config))
            }
            MixStrategyConfig::StopAndGo(config) => MixStrategy::StopAndGo(StopAndGo::new(config)),
        }
    }

    fn inner(&mut self) -> &mut dyn Strategy {
        match self {
            MixStrategy::Forward(strategy) => strategy,
            MixStrategy::ThresholdBatch(strategy) => strategy,
            MixStrategy::StopAndGo(strategy) => strategy,
        }
    }
}

impl Strategy for MixStrategy {
    fn name(&self) -> &'static str {
        match self {
            MixStrategy::Forward(strategy) => strategy.name(),
            MixStrategy::ThresholdBatch(strategy) => strategy.name(),
            MixStrategy::StopAndGo(strategy) => strategy.name(),
        }
    }

    fn on_start(&mut self, ctx: &mut dyn StrategyContext) -> Result<(), StrategyError> {
        self.inner().on_start(ctx)
    }

    fn on_incoming_application_data(
        &mut self,
        ctx: &mut dyn StrategyContext,
        data: TransportMessage,
    ) -> Result<(), StrategyError> {
        self.inner().on_incoming_application_data(ctx, data)
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        self.inner().on_incoming_network_message(ctx, message)
    }

    fn on_delivery_acknowledged(
        &mut self,
        ctx: &mut dyn StrategyContext,
    ) -> Result<(), StrategyError> {
        self.inner().on_delivery_acknowledged(ctx)
    }

    fn on_timer_fired(
        &mut self,
        ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        self.inner().on_timer_fired(ctx, timer)
    }
}
