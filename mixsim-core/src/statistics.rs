//! Per-run statistics registry.
//!
//! Each simulation run owns one registry; nothing here is global, so runs
//! executed back to back or in parallel never observe each other's values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SimTime;

/// Measurable quantities recorded during a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum StatisticType {
    /// Mix messages emitted by clients, dummies included
    MessagesSent,
    /// Cover messages emitted by clients
    DummyMessagesSent,
    /// Application messages fully delivered to the destination
    PayloadsDelivered,
    /// Application bytes delivered to the destination
    PayloadBytesDelivered,
    /// Time from application message creation to full delivery (ms)
    EndToEndLatency,
    /// Time from request creation to reply arrival at the client (ms)
    RoundTripTime,
    /// Time a message spent inside a mix (ms)
    MixHoldingTime,
    /// Number of messages released per batch flush
    BatchSize,
    /// Messages discarded by a mix, e.g. outside the Stop-and-Go window
    DroppedMessages,
    /// Delivered application bytes per second of recording window
    Throughput,
}

/// How values of a statistic are accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticKind {
    /// Values are summed
    Counter,
    /// Every value is kept
    Samples,
    /// Computed from other statistics when read
    Derived,
}

impl StatisticType {
    /// Every statistic, in declaration order.
    pub const ALL: [StatisticType; 10] = [
        StatisticType::MessagesSent,
        StatisticType::DummyMessagesSent,
        StatisticType::PayloadsDelivered,
        StatisticType::PayloadBytesDelivered,
        StatisticType::EndToEndLatency,
        StatisticType::RoundTripTime,
        StatisticType::MixHoldingTime,
        StatisticType::BatchSize,
        StatisticType::DroppedMessages,
        StatisticType::Throughput,
    ];

    pub fn kind(self) -> StatisticKind {
        match self {
            StatisticType::MessagesSent
            | StatisticType::DummyMessagesSent
            | StatisticType::PayloadsDelivered
            | StatisticType::PayloadBytesDelivered
            | StatisticType::DroppedMessages => StatisticKind::Counter,
            StatisticType::EndToEndLatency
            | StatisticType::RoundTripTime
            | StatisticType::MixHoldingTime
            | StatisticType::BatchSize => StatisticKind::Samples,
            StatisticType::Throughput => StatisticKind::Derived,
        }
    }

    /// Stable identifier used in result files.
    pub fn as_str(self) -> &'static str {
        match self {
            StatisticType::MessagesSent => "messagesSent",
            StatisticType::DummyMessagesSent => "dummyMessagesSent",
            StatisticType::PayloadsDelivered => "payloadsDelivered",
            StatisticType::PayloadBytesDelivered => "payloadBytesDelivered",
            StatisticType::EndToEndLatency => "endToEndLatency",
            StatisticType::RoundTripTime => "roundTripTime",
            StatisticType::MixHoldingTime => "mixHoldingTime",
            StatisticType::BatchSize => "batchSize",
            StatisticType::DroppedMessages => "droppedMessages",
            StatisticType::Throughput => "throughput",
        }
    }
}

impl fmt::Display for StatisticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one statistic for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatisticValue {
    Scalar(f64),
    Samples(Vec<f64>),
}

impl StatisticValue {
    /// Scalar value, or the arithmetic mean of the samples.
    ///
    /// Returns `None` for an empty sample set.
    pub fn mean(&self) -> Option<f64> {
        match self {
            StatisticValue::Scalar(value) => Some(*value),
            StatisticValue::Samples(samples) if samples.is_empty() => None,
            StatisticValue::Samples(samples) => {
                Some(samples.iter().sum::<f64>() / samples.len() as f64)
            }
        }
    }
}

/// Collects statistics for a single simulation run.
#[derive(Debug, Clone, Default)]
pub struct StatisticsRegistry {
    recording_from: SimTime,
    recording_until: Option<SimTime>,
    counters: BTreeMap<StatisticType, f64>,
    samples: BTreeMap<StatisticType, Vec<f64>>,
}

impl StatisticsRegistry {
    /// Creates a registry ignoring everything recorded before `recording_from`.
    pub fn new(recording_from: SimTime) -> Self {
        Self {
            recording_from,
            ..Self::default()
        }
    }

    /// Records one observation made at simulated time `now`.
    pub fn record(&mut self, statistic: StatisticType, value: f64, now: SimTime) {
        if now < self.recording_from || self.recording_until.is_some_and(|until| now > until) {
            return;
        }

        match statistic.kind() {
            StatisticKind::Counter => *self.counters.entry(statistic).or_insert(0.0) += value,
            StatisticKind::Samples => self.samples.entry(statistic).or_default().push(value),
            StatisticKind::Derived => {
                tracing::trace!("Ignoring direct record of derived statistic {statistic}");
            }
        }
    }

    /// Closes the recording window. Later calls keep the first end time.
    pub fn finish(&mut self, now: SimTime) {
        if self.recording_until.is_none() {
            self.recording_until = Some(now.max(self.recording_from));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.recording_until.is_some()
    }

    pub fn recording_from(&self) -> SimTime {
        self.recording_from
    }

    /// Length of the recording window, zero while still open.
    pub fn window(&self) -> SimTime {
        self.recording_until
            .map_or(0, |until| until - self.recording_from)
    }

    /// Current counter value, zero if never recorded.
    pub fn counter(&self, statistic: StatisticType) -> f64 {
        self.counters.get(&statistic).copied().unwrap_or(0.0)
    }

    /// Reads the value of a statistic.
    ///
    /// Counters and derived values are always present; sample statistics
    /// return an empty sample set when nothing was observed.
    pub fn result(&self, statistic: StatisticType) -> Option<StatisticValue> {
        match statistic.kind() {
            StatisticKind::Counter => Some(StatisticValue::Scalar(self.counter(statistic))),
            StatisticKind::Samples => Some(StatisticValue::Samples(
                self.samples.get(&statistic).cloned().unwrap_or_default(),
            )),
            StatisticKind::Derived => self.derived(statistic),
        }
    }

    fn derived(&self, statistic: StatisticType) -> Option<StatisticValue> {
        match statistic {
            StatisticType::Throughput => {
                let window = self.window();
                let bytes = self.counter(StatisticType::PayloadBytesDelivered);
                let rate = if window == 0 {
                    0.0
                } else {
                    bytes * 1000.0 / window as f64
                };
                Some(StatisticValue::Scalar(rate))
            }
            _ => None,
        }
    }

    /// Clears all values and reopens the window.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.samples.clear();
        self.recording_until = None;
    }
}
