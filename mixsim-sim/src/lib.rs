//! Mixsim Sim - deterministic discrete-event simulation of mix networks.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! One [`SimulationRun`] owns its scheduler, clock, random source, id
//! allocator and statistics registry. Nothing is global, so runs replay
//! bit-identically from a seed and independent runs can execute on
//! separate threads.
//!
//! # Example
//!
//! ```rust,no_run
//! use mixsim_core::config::MixSimConfig;
//! use mixsim_core::statistics::StatisticType;
//! use mixsim_sim::SimulationRun;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MixSimConfig::for_testing();
//! let report = SimulationRun::new(&config, 7)?.execute()?;
//! println!(
//!     "{} payloads delivered in {} ms",
//!     report.statistics.counter(StatisticType::PayloadsDelivered),
//!     report.simulated_duration
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Deterministic Engine**: event scheduler with tombstone cancellation
//! - **Network**: cascade topology and links with uniform latency
//! - **Traffic**: synthetic application data per client
//! - **Run**: wires strategies to the scheduler through a strategy context
//! - **Experiment**: parameter sweeps, sequential or on tokio's blocking pool

pub mod deterministic;
pub mod experiment;
pub mod network;
pub mod run;
pub mod traffic;

use mixsim_core::SimTime;
use mixsim_core::config::ConfigError;
use mixsim_core::message::ParticipantId;
use mixsim_core::strategy::StrategyError;

pub use deterministic::{DeterministicClock, DeterministicRng, Scheduler};
pub use experiment::{
    Experiment, ExperimentConfig, ExperimentReport, ResultSet, SecondSweep, SweepProperty,
};
pub use network::{Network, Topology};
pub use run::{RunReport, SimulationRun, StopReason};
pub use traffic::{SyntheticTraffic, TrafficSource};

/// Errors that abort a simulation run or a sweep.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Event scheduled at {at} ms, but simulated time is already {now} ms")]
    EventInPast { at: SimTime, now: SimTime },

    #[error("Sequence numbers exhausted with {pending} events pending")]
    SequenceExhausted { pending: u64 },

    #[error("Strategy of {participant} failed: {source}")]
    Strategy {
        participant: ParticipantId,
        #[source]
        source: StrategyError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown participant {participant} ({context})")]
    UnknownParticipant {
        participant: ParticipantId,
        context: &'static str,
    },

    #[error("Unexpected event {kind} for {target}")]
    UnexpectedEvent { target: String, kind: String },

    #[error("Run {run_index} for value #{value_index} failed: {source}")]
    RunFailed {
        value_index: usize,
        run_index: usize,
        #[source]
        source: Box<SimulationError>,
    },

    #[error("Concurrent run failed: {reason}")]
    ConcurrentRun { reason: String },
}

impl SimulationError {
    /// Checks if this error stems from rejected user input.
    pub fn is_user_error(&self) -> bool {
        match self {
            SimulationError::Config(_)
            | SimulationError::Strategy {
                source: StrategyError::InvalidParameter { .. },
                ..
            } => true,
            SimulationError::RunFailed { source, .. } => source.is_user_error(),
            _ => false,
        }
    }
}
