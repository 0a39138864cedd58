//! Centralized configuration for mixsim.
//!
//! All tunable parameters of a simulation scenario are defined here; the
//! strategies receive their typed section already validated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SimTime;

/// Rejected configuration value. Surfaced before a run starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown sweep property: {name}")]
    UnknownProperty { name: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Complete description of one simulation scenario.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MixSimConfig {
    pub simulation: SimulationConfig,
    pub topology: TopologyConfig,
    pub traffic: TrafficConfig,
    pub message: MessageConfig,
    pub client: ClientSendStyle,
    pub mix: MixStrategyConfig,
}

/// Run control: seed, end condition and statistics window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed for every random decision in the run
    pub seed: u64,
    /// When the run terminates besides running out of events
    pub end_condition: EndCondition,
    /// Simulated time at which statistics recording begins (ms)
    pub statistics_start: SimTime,
    /// Grace period for in-flight messages after every trace ended (ms)
    pub drain_period: SimTime,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            end_condition: EndCondition::TraceExhausted,
            statistics_start: 0,
            drain_period: 1000,
        }
    }
}

/// Condition that ends a run early.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EndCondition {
    /// Process every event scheduled at or before `limit` (ms)
    SimulatedTime { limit: SimTime },
    /// Stop once every client has exhausted its traffic trace
    TraceExhausted,
    /// Stop after a wall-clock budget; not reproducible across machines
    WallClock { limit: Duration },
}

/// Participants and links of the simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Number of clients
    pub clients: usize,
    /// Number of mixes in the cascade
    pub mixes: usize,
    /// Lower bound of per-link latency (ms)
    pub min_link_delay: SimTime,
    /// Upper bound of per-link latency (ms)
    pub max_link_delay: SimTime,
    /// Whether the destination answers every request with a reply
    pub duplex: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            clients: 10,
            mixes: 3,
            min_link_delay: 5,
            max_link_delay: 20,
            duplex: false,
        }
    }
}

/// Arrival process of application data at each client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrafficModel {
    /// One message every `interval` ms
    ConstantRate { interval: SimTime },
    /// Exponentially distributed gaps with the given mean (ms)
    Poisson { mean_interval: SimTime },
}

/// Application traffic generated per client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficConfig {
    pub model: TrafficModel,
    /// Smallest application message (bytes)
    pub min_payload: usize,
    /// Largest application message (bytes)
    pub max_payload: usize,
    /// Length of each client's trace; `None` never ends
    pub messages_per_client: Option<u64>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            model: TrafficModel::ConstantRate { interval: 100 },
            min_payload: 64,
            max_payload: 512,
            messages_per_client: Some(50),
        }
    }
}

/// Shape of mix-level messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Payload capacity of every message (bytes)
    pub capacity: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self { capacity: 512 }
    }
}

/// Send style used by every client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ClientSendStyle {
    /// Send as soon as data arrives
    #[default]
    Immediate,
    /// Send one message per interval, dummies when idle
    BasicSynchronous(BasicSynchronousConfig),
    /// Coalesce data until full or a timeout fires
    WaitForData(WaitForDataConfig),
    /// Send the next request when the previous one was answered
    WaitForReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicSynchronousConfig {
    /// Time between two sends (ms)
    pub interval: SimTime,
}

impl Default for BasicSynchronousConfig {
    fn default() -> Self {
        Self { interval: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitForDataConfig {
    /// Longest time a partially filled message is held (ms)
    pub timeout: SimTime,
}

impl Default for WaitForDataConfig {
    fn default() -> Self {
        Self { timeout: 50 }
    }
}

/// Mixing strategy used by every mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MixStrategyConfig {
    /// Relay without delay
    Forward,
    /// Release batches on size threshold or timeout
    ThresholdBatch(ThresholdBatchConfig),
    /// Hold each message for a sender-chosen random delay
    StopAndGo(StopAndGoConfig),
}

impl Default for MixStrategyConfig {
    fn default() -> Self {
        MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBatchConfig {
    /// Messages per batch; normally the expected number of participants
    pub threshold: usize,
    /// Longest time the first message of a batch waits (ms)
    pub timeout: Option<SimTime>,
}

impl Default for ThresholdBatchConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            timeout: Some(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAndGoConfig {
    /// Rate of the exponential per-hop delay (1/s)
    pub mu: f64,
    /// Smallest expected latency between two hops (ms)
    pub min_inter_mix_delay: SimTime,
    /// Largest expected latency between two hops (ms)
    pub max_inter_mix_delay: SimTime,
    /// Tolerated clock skew between participants (ms)
    pub max_clock_deviation: SimTime,
    /// Whether mixes reject messages outside their arrival window
    pub timestamps_enabled: bool,
}

impl Default for StopAndGoConfig {
    fn default() -> Self {
        Self {
            mu: 10.0,
            min_inter_mix_delay: 5,
            max_inter_mix_delay: 20,
            max_clock_deviation: 10,
            timestamps_enabled: true,
        }
    }
}

impl MixSimConfig {
    /// Small, fast and fully deterministic scenario for tests.
    pub fn for_testing() -> Self {
        Self {
            simulation: SimulationConfig {
                seed: 42,
                end_condition: EndCondition::TraceExhausted,
                statistics_start: 0,
                drain_period: 500,
            },
            topology: TopologyConfig {
                clients: 4,
                mixes: 2,
                min_link_delay: 10,
                max_link_delay: 10,
                duplex: false,
            },
            traffic: TrafficConfig {
                model: TrafficModel::ConstantRate { interval: 50 },
                min_payload: 32,
                max_payload: 128,
                messages_per_client: Some(10),
            },
            message: MessageConfig { capacity: 256 },
            client: ClientSendStyle::Immediate,
            mix: MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
                threshold: 4,
                timeout: Some(200),
            }),
        }
    }

    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seed) = env_value::<u64>("MIXSIM_SEED") {
            config.simulation.seed = seed;
        }
        if let Some(clients) = env_value::<usize>("MIXSIM_CLIENTS") {
            config.topology.clients = clients;
        }
        if let Some(mixes) = env_value::<usize>("MIXSIM_MIXES") {
            config.topology.mixes = mixes;
        }
        if let Some(capacity) = env_value::<usize>("MIXSIM_MESSAGE_CAPACITY") {
            config.message.capacity = capacity;
        }
        if let Some(threshold) = env_value::<usize>("MIXSIM_BATCH_SIZE")
            && let MixStrategyConfig::ThresholdBatch(batch) = &mut config.mix
        {
            batch.threshold = threshold;
        }
        if let Some(limit) = env_value::<SimTime>("MIXSIM_SIMULATED_TIME_MS") {
            config.simulation.end_condition = EndCondition::SimulatedTime { limit };
        }

        config
    }

    /// Checks every section before a run is built.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidParameter` - A value is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let topology = &self.topology;
        if topology.clients == 0 {
            return Err(ConfigError::invalid("clients", "at least one client required"));
        }
        if topology.mixes == 0 {
            return Err(ConfigError::invalid("mixes", "at least one mix required"));
        }
        if topology.min_link_delay > topology.max_link_delay {
            return Err(ConfigError::invalid(
                "min_link_delay",
                format!(
                    "{} exceeds max_link_delay {}",
                    topology.min_link_delay, topology.max_link_delay
                ),
            ));
        }

        if self.message.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be positive"));
        }

        let traffic = &self.traffic;
        if traffic.min_payload == 0 {
            return Err(ConfigError::invalid(
                "min_payload",
                "application messages carry at least one byte",
            ));
        }
        if traffic.min_payload > traffic.max_payload {
            return Err(ConfigError::invalid(
                "payload",
                format!("range {}..={} is empty", traffic.min_payload, traffic.max_payload),
            ));
        }
        match traffic.model {
            TrafficModel::ConstantRate { interval: 0 } | TrafficModel::Poisson { mean_interval: 0 } => {
                return Err(ConfigError::invalid("traffic_interval", "must be positive"));
            }
            _ => {}
        }

        match self.simulation.end_condition {
            EndCondition::SimulatedTime { limit } if limit < self.simulation.statistics_start => {
                return Err(ConfigError::invalid(
                    "statistics_start",
                    "recording would start after the run ends",
                ));
            }
            EndCondition::TraceExhausted if traffic.messages_per_client.is_none() => {
                return Err(ConfigError::invalid(
                    "messages_per_client",
                    "an unbounded trace never exhausts",
                ));
            }
            _ => {}
        }

        self.client.validate()?;
        self.mix.validate()
    }
}

impl ClientSendStyle {
    /// Short name used in logs and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ClientSendStyle::Immediate => "immediate",
            ClientSendStyle::BasicSynchronous(_) => "basic-synchronous",
            ClientSendStyle::WaitForData(_) => "wait-for-data",
            ClientSendStyle::WaitForReply => "wait-for-reply",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ClientSendStyle::BasicSynchronous(config) if config.interval == 0 => {
                Err(ConfigError::invalid("send_interval", "must be positive"))
            }
            ClientSendStyle::WaitForData(config) if config.timeout == 0 => {
                Err(ConfigError::invalid("timeout", "must be positive"))
            }
            _ => Ok(()),
        }
    }
}

impl MixStrategyConfig {
    /// Short name used in logs and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            MixStrategyConfig::Forward => "forward",
            MixStrategyConfig::ThresholdBatch(_) => "threshold-batch",
            MixStrategyConfig::StopAndGo(_) => "stop-and-go",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            MixStrategyConfig::Forward => Ok(()),
            MixStrategyConfig::ThresholdBatch(config) => {
                if config.threshold == 0 {
                    return Err(ConfigError::invalid("batch_size", "must be positive"));
                }
                if config.timeout == Some(0) {
                    return Err(ConfigError::invalid("timeout", "must be positive"));
                }
                Ok(())
            }
            MixStrategyConfig::StopAndGo(config) => {
                if !config.mu.is_finite() || config.mu <= 0.0 {
                    return Err(ConfigError::invalid(
                        "mu",
                        format!("{} is not a positive rate", config.mu),
                    ));
                }
                if config.min_inter_mix_delay > config.max_inter_mix_delay {
                    return Err(ConfigError::invalid(
                        "min_inter_mix_delay",
                        "exceeds max_inter_mix_delay",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MixSimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.seed, 42);
        assert_eq!(config.message.capacity, 512);
        assert_eq!(config.mix.name(), "threshold-batch");
    }

    #[test]
    fn test_testing_preset_is_valid() {
        let config = MixSimConfig::for_testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.clients, 4);
        assert_eq!(config.client.name(), "immediate");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = MixSimConfig::for_testing();
        config.message.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                name: "capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_payloads_rejected() {
        let mut config = MixSimConfig::for_testing();
        config.traffic.min_payload = 0;
        config.traffic.max_payload = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                name: "min_payload",
                ..
            })
        ));

        config.traffic.min_payload = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "payload", .. })
        ));
    }

    #[test]
    fn test_strategy_parameters_validated() {
        let mut config = MixSimConfig::for_testing();
        config.mix = MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
            threshold: 0,
            timeout: None,
        });
        assert!(config.validate().is_err());

        config.mix = MixStrategyConfig::StopAndGo(StopAndGoConfig {
            mu: -1.0,
            ..StopAndGoConfig::default()
        });
        assert!(config.validate().is_err());

        config.mix = MixStrategyConfig::Forward;
        config.client = ClientSendStyle::BasicSynchronous(BasicSynchronousConfig { interval: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_trace_needs_other_end_condition() {
        let mut config = MixSimConfig::for_testing();
        config.traffic.messages_per_client = None;
        assert!(config.validate().is_err());

        config.simulation.end_condition = EndCondition::SimulatedTime { limit: 1000 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_link_delay_bounds_checked() {
        let mut config = MixSimConfig::for_testing();
        config.topology.min_link_delay = 50;
        config.topology.max_link_delay = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("MIXSIM_SEED", "777");
            std::env::set_var("MIXSIM_CLIENTS", "50");
            std::env::set_var("MIXSIM_BATCH_SIZE", "25");
            std::env::set_var("MIXSIM_SIMULATED_TIME_MS", "60000");
        }

        let config = MixSimConfig::from_env();

        assert_eq!(config.simulation.seed, 777);
        assert_eq!(config.topology.clients, 50);
        assert_eq!(
            config.mix,
            MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
                threshold: 25,
                timeout: Some(1000),
            })
        );
        assert_eq!(
            config.simulation.end_condition,
            EndCondition::SimulatedTime { limit: 60000 }
        );

        unsafe {
            std::env::remove_var("MIXSIM_SEED");
            std::env::remove_var("MIXSIM_CLIENTS");
            std::env::remove_var("MIXSIM_BATCH_SIZE");
            std::env::remove_var("MIXSIM_SIMULATED_TIME_MS");
        }
    }
}
