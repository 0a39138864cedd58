//! Real-time driver for strategies.
//!
//! A live node runs one [`Strategy`](crate::strategy::Strategy) as a tokio
//! actor. Time is the wall clock measured from node start, timers are tokio
//! tasks, and outbound messages go to a bounded channel owned by the
//! caller. The strategy code is exactly the one the simulator drives.

mod actor;
mod commands;
mod handle;

pub use actor::spawn_live_node;
pub use commands::LiveNodeCommand;
pub use handle::LiveNodeHandle;

use crate::config::StopAndGoConfig;
use crate::message::ParticipantId;

/// Parameters of one live node.
#[derive(Debug, Clone)]
pub struct LiveNodeConfig {
    /// Participant the node represents
    pub owner: ParticipantId,
    /// Destination stamped on messages the node creates
    pub destination: ParticipantId,
    /// Capacity of messages the node creates
    pub capacity: usize,
    /// Depth of the command channel
    pub command_buffer: usize,
    /// Seed of the node's random source
    pub seed: u64,
    /// Hops of messages the node originates, ending at the destination.
    /// Empty leaves them unrouted.
    pub route: Vec<ParticipantId>,
    /// Stamps Stop-and-Go headers on originated messages, one per mix on `route`
    pub stop_and_go: Option<StopAndGoConfig>,
}

impl Default for LiveNodeConfig {
    fn default() -> Self {
        Self {
            owner: ParticipantId(0),
            destination: ParticipantId(1),
            capacity: 512,
            command_buffer: 100,
            seed: 0,
            route: Vec::new(),
            stop_and_go: None,
        }
    }
}
