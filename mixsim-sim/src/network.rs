//! Simulated links between participants.

use mixsim_core::SimTime;
use mixsim_core::message::{Message, ParticipantId, Route};

use crate::SimulationError;
use crate::deterministic::{Attachment, DeterministicRng, EventId, EventKind, EventTarget, Scheduler};

/// Participants of a run: clients, a cascade of mixes and one destination.
#[derive(Debug, Clone)]
pub struct Topology {
    clients: Vec<ParticipantId>,
    mixes: Vec<ParticipantId>,
    destination: ParticipantId,
}

impl Topology {
    pub fn new(
        clients: Vec<ParticipantId>,
        mixes: Vec<ParticipantId>,
        destination: ParticipantId,
    ) -> Self {
        Self {
            clients,
            mixes,
            destination,
        }
    }

    pub fn clients(&self) -> &[ParticipantId] {
        &self.clients
    }

    pub fn mixes(&self) -> &[ParticipantId] {
        &self.mixes
    }

    pub fn destination(&self) -> ParticipantId {
        self.destination
    }

    /// Route of a request: every mix of the cascade, then the destination.
    pub fn request_route(&self) -> Route {
        let mut hops = self.mixes.clone();
        hops.push(self.destination);
        Route::new(hops)
    }

    /// Route of a reply to `request`: back through the cascade to its sender.
    pub fn reply_route(&self, request: &Message) -> Route {
        let back = request.route().reversed();
        let mut hops: Vec<ParticipantId> = back
            .hops()
            .iter()
            .copied()
            .filter(|hop| *hop != self.destination)
            .collect();
        hops.push(request.source());
        Route::new(hops)
    }

    /// Event target receiving messages addressed to `participant`.
    pub fn target_of(&self, participant: ParticipantId) -> Option<EventTarget> {
        if participant == self.destination {
            Some(EventTarget::Destination)
        } else if self.mixes.contains(&participant) {
            Some(EventTarget::Mix(participant))
        } else if self.clients.contains(&participant) {
            Some(EventTarget::Client(participant))
        } else {
            None
        }
    }
}

/// Links with uniformly distributed latency.
#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    min_link_delay: SimTime,
    max_link_delay: SimTime,
}

impl Network {
    pub fn new(topology: Topology, min_link_delay: SimTime, max_link_delay: SimTime) -> Self {
        Self {
            topology,
            min_link_delay,
            max_link_delay,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// One latency sample for a single link.
    pub fn link_latency(&self, rng: &mut DeterministicRng) -> SimTime {
        rng.random_range(self.min_link_delay, self.max_link_delay)
    }

    /// Moves `message` to the next hop on its route.
    ///
    /// The arrival is scheduled `extra_delay` plus one link latency from now.
    ///
    /// # Errors
    ///
    /// - `SimulationError::UnknownParticipant` - The route is exhausted or names an unknown hop
    pub fn transmit(
        &self,
        scheduler: &mut Scheduler,
        rng: &mut DeterministicRng,
        mut message: Message,
        extra_delay: SimTime,
    ) -> Result<EventId, SimulationError> {
        let hop = message
            .route_mut()
            .advance()
            .ok_or(SimulationError::UnknownParticipant {
                participant: message.destination(),
                context: "route exhausted",
            })?;
        let target = self
            .topology
            .target_of(hop)
            .ok_or(SimulationError::UnknownParticipant {
                participant: hop,
                context: "next hop",
            })?;

        let latency = self.link_latency(rng);
        tracing::trace!(
            "{} -> {} in {} ms ({} bytes on the wire)",
            message.id(),
            hop,
            extra_delay + latency,
            message.wire_len()
        );
        scheduler.schedule_in(
            extra_delay + latency,
            target,
            EventKind::MessageArrival,
            Some(Attachment::Message(message)),
        )
    }
}
