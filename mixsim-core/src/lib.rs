//! Mixsim Core - message model and timing strategies for mix networks
//!
//! This crate holds everything a mix-network participant needs regardless of
//! whether it runs inside the deterministic simulator or on a real clock:
//! fixed-capacity messages and fragmentation, the send and mix strategies,
//! statistics bookkeeping, configuration, and the tokio driver used for live
//! nodes.

pub mod config;
pub mod live;
pub mod message;
pub mod statistics;
pub mod strategy;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::{ConfigError, MixSimConfig};
pub use message::{
    Direction, IdAllocator, Message, MessageError, MessageId, ParticipantId, TransportMessage,
};
pub use statistics::{StatisticType, StatisticValue, StatisticsRegistry};
pub use strategy::{ClientStrategy, MixStrategy, Strategy, StrategyContext, StrategyError};

/// Simulated time in milliseconds.
pub type SimTime = u64;

/// Errors that can bubble up from any mixsim subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MixSimError {
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Live node error: {reason}")]
    LiveNode { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MixSimError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            MixSimError::Config(e) => match e {
                ConfigError::InvalidParameter { name, reason } => {
                    format!("Invalid value for {name}: {reason}")
                }
                ConfigError::UnknownProperty { name } => format!("Unknown property: {name}"),
            },
            MixSimError::Message(_) => "Message assembly error occurred".to_string(),
            MixSimError::Strategy(e) => format!("Strategy failed: {e}"),
            MixSimError::LiveNode { reason } => format!("Live node stopped: {reason}"),
            MixSimError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MixSimError::Config(_) | MixSimError::Strategy(StrategyError::InvalidParameter { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, MixSimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_user_errors() {
        let error: MixSimError = ConfigError::InvalidParameter {
            name: "clients",
            reason: "must be at least 1".to_string(),
        }
        .into();

        assert!(error.is_user_error());
        assert_eq!(
            error.user_message(),
            "Invalid value for clients: must be at least 1"
        );
    }

    #[test]
    fn test_strategy_bugs_are_not_user_errors() {
        let error: MixSimError = StrategyError::MissingAttachment.into();
        assert!(!error.is_user_error());
    }
}
