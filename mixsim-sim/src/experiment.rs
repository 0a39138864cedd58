//! Parameter sweeps over independent simulation runs.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mixsim_core::SimTime;
use mixsim_core::config::{
    ClientSendStyle, ConfigError, MixSimConfig, MixStrategyConfig, TrafficModel,
};
use mixsim_core::statistics::{StatisticType, StatisticValue};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::SimulationError;
use crate::run::{RunReport, SimulationRun};

/// Configuration value varied by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepProperty {
    /// Threshold of the batching mix
    BatchSize,
    NumberOfClients,
    NumberOfMixes,
    /// Interval of basic-synchronous clients (ms)
    SendInterval,
    /// Wait-for-data timeout, or the batch timeout of a batching mix (ms)
    Timeout,
    /// Rate of the Stop-and-Go delay (1/s)
    StopAndGoMu,
    MessageCapacity,
    /// Fixed size of every application message (bytes)
    PayloadSize,
    /// Mean gap between application messages (ms)
    TrafficInterval,
}

impl SweepProperty {
    /// Identifier used in result files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SweepProperty::BatchSize => "BATCH_SIZE",
            SweepProperty::NumberOfClients => "NUMBER_OF_CLIENTS",
            SweepProperty::NumberOfMixes => "NUMBER_OF_MIXES",
            SweepProperty::SendInterval => "SEND_INTERVAL",
            SweepProperty::Timeout => "TIMEOUT",
            SweepProperty::StopAndGoMu => "STOP_AND_GO_MU",
            SweepProperty::MessageCapacity => "MESSAGE_CAPACITY",
            SweepProperty::PayloadSize => "PAYLOAD_SIZE",
            SweepProperty::TrafficInterval => "TRAFFIC_INTERVAL",
        }
    }

    /// Writes `value` into the matching field of `config`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidParameter` - The value does not fit the property
    /// - `ConfigError::InvalidParameter` - The configured strategies have no such parameter
    pub fn apply(self, config: &mut MixSimConfig, value: f64) -> Result<(), ConfigError> {
        match self {
            SweepProperty::BatchSize => match &mut config.mix {
                MixStrategyConfig::ThresholdBatch(batch) => {
                    batch.threshold = whole(self, value)? as usize;
                }
                other => return Err(not_configured(self, other.name())),
            },
            SweepProperty::NumberOfClients => config.topology.clients = whole(self, value)? as usize,
            SweepProperty::NumberOfMixes => config.topology.mixes = whole(self, value)? as usize,
            SweepProperty::SendInterval => match &mut config.client {
                ClientSendStyle::BasicSynchronous(sync) => sync.interval = whole(self, value)?,
                other => return Err(not_configured(self, other.name())),
            },
            SweepProperty::Timeout => match (&mut config.client, &mut config.mix) {
                (ClientSendStyle::WaitForData(wait), _) => wait.timeout = whole(self, value)?,
                (_, MixStrategyConfig::ThresholdBatch(batch)) => {
                    batch.timeout = Some(whole(self, value)?);
                }
                (_, other) => return Err(not_configured(self, other.name())),
            },
            SweepProperty::StopAndGoMu => match &mut config.mix {
                MixStrategyConfig::StopAndGo(stop_and_go) => stop_and_go.mu = value,
                other => return Err(not_configured(self, other.name())),
            },
            SweepProperty::MessageCapacity => config.message.capacity = whole(self, value)? as usize,
            SweepProperty::PayloadSize => {
                let size = whole(self, value)? as usize;
                config.traffic.min_payload = size;
                config.traffic.max_payload = size;
            }
            SweepProperty::TrafficInterval => {
                let gap = whole(self, value)?;
                config.traffic.model = match config.traffic.model {
                    TrafficModel::ConstantRate { .. } => TrafficModel::ConstantRate { interval: gap },
                    TrafficModel::Poisson { .. } => TrafficModel::Poisson { mean_interval: gap },
                };
            }
        }
        Ok(())
    }
}

impl fmt::Display for SweepProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn whole(property: SweepProperty, value: f64) -> Result<u64, ConfigError> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(ConfigError::InvalidParameter {
            name: property.as_str(),
            reason: format!("{value} is not a non-negative whole number"),
        });
    }
    Ok(value as u64)
}

fn not_configured(property: SweepProperty, strategy: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name: property.as_str(),
        reason: format!("not a parameter of the configured {strategy} strategy"),
    }
}

/// Second property varied in lockstep with the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondSweep {
    pub property: SweepProperty,
    /// Paired by index with the first property's values
    pub values: Vec<f64>,
}

/// Definition of a parameter sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Scenario every run starts from
    pub base: MixSimConfig,
    pub property: SweepProperty,
    pub values: Vec<f64>,
    pub second: Option<SecondSweep>,
    /// Independent runs per value
    pub runs_per_value: usize,
    /// Statistics extracted from every run
    pub statistics: Vec<StatisticType>,
    /// Root seed; every run derives its own from it
    pub seed: u64,
}

impl ExperimentConfig {
    /// Sweep of `property` over `values` with one run per value.
    pub fn new(base: MixSimConfig, property: SweepProperty, values: Vec<f64>) -> Self {
        let seed = base.simulation.seed;
        Self {
            base,
            property,
            values,
            second: None,
            runs_per_value: 1,
            statistics: vec![StatisticType::Throughput],
            seed,
        }
    }

    /// Checks the sweep shape and every scenario it will produce.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidParameter` - The sweep is empty or the paired lists differ
    /// - `ConfigError::InvalidParameter` - A swept value yields an invalid scenario
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason: &str| ConfigError::InvalidParameter {
            name,
            reason: reason.to_string(),
        };

        if self.values.is_empty() {
            return Err(invalid("values", "at least one value required"));
        }
        if self.runs_per_value == 0 {
            return Err(invalid("runs", "at least one run per value required"));
        }
        if self.statistics.is_empty() {
            return Err(invalid("statistics", "at least one statistic required"));
        }
        if let Some(second) = &self.second {
            if second.values.len() != self.values.len() {
                return Err(ConfigError::InvalidParameter {
                    name: "second_values",
                    reason: format!(
                        "{} values paired with {} values of {}",
                        second.values.len(),
                        self.values.len(),
                        self.property
                    ),
                });
            }
            if second.property == self.property {
                return Err(invalid("second_property", "must differ from the first"));
            }
        }

        for value_index in 0..self.values.len() {
            self.scenario(value_index)?.validate()?;
        }
        Ok(())
    }

    /// Scenario of the value at `value_index`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidParameter` - A swept value does not fit its property
    pub fn scenario(&self, value_index: usize) -> Result<MixSimConfig, ConfigError> {
        let mut config = self.base.clone();
        if let Some(value) = self.values.get(value_index) {
            self.property.apply(&mut config, *value)?;
        }
        if let Some(second) = &self.second {
            if let Some(value) = second.values.get(value_index) {
                second.property.apply(&mut config, *value)?;
            }
        }
        Ok(config)
    }

    /// Seed of one run, derived from the root seed and the run's position.
    pub fn run_seed(&self, value_index: usize, run_index: usize) -> u64 {
        self.seed
            ^ (value_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (run_index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
    }
}

/// Statistic values of a sweep, indexed `[value][statistic][run]`.
///
/// Holds only simulated quantities, so equal configurations and seeds
/// produce equal result sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub property: SweepProperty,
    pub values: Vec<f64>,
    pub second_property: Option<SweepProperty>,
    pub second_values: Option<Vec<f64>>,
    pub statistics: Vec<StatisticType>,
    pub cells: Vec<Vec<Vec<Option<StatisticValue>>>>,
    pub number_of_clients: Vec<usize>,
    pub number_of_mixes: Vec<usize>,
    /// Longest simulated duration among the runs of each value (ms)
    pub simulated_duration: Vec<SimTime>,
}

impl ResultSet {
    fn empty(config: &ExperimentConfig) -> Self {
        let values = config.values.len();
        Self {
            property: config.property,
            values: config.values.clone(),
            second_property: config.second.as_ref().map(|second| second.property),
            second_values: config.second.as_ref().map(|second| second.values.clone()),
            statistics: config.statistics.clone(),
            cells: vec![vec![vec![None; config.runs_per_value]; config.statistics.len()]; values],
            number_of_clients: vec![0; values],
            number_of_mixes: vec![0; values],
            simulated_duration: vec![0; values],
        }
    }

    fn place(&mut self, value_index: usize, run_index: usize, report: &RunReport) {
        for (statistic_index, statistic) in self.statistics.iter().enumerate() {
            self.cells[value_index][statistic_index][run_index] =
                report.statistics.result(*statistic);
        }
        self.number_of_clients[value_index] = report.number_of_clients;
        self.number_of_mixes[value_index] = report.number_of_mixes;
        self.simulated_duration[value_index] =
            self.simulated_duration[value_index].max(report.simulated_duration);
    }

    /// Value of one statistic in one run.
    pub fn cell(
        &self,
        value_index: usize,
        statistic_index: usize,
        run_index: usize,
    ) -> Option<&StatisticValue> {
        self.cells
            .get(value_index)?
            .get(statistic_index)?
            .get(run_index)?
            .as_ref()
    }

    /// Mean over all runs of a value, each run contributing its own mean.
    ///
    /// Returns `None` when no run produced a value.
    pub fn mean(&self, value_index: usize, statistic_index: usize) -> Option<f64> {
        let runs = self.cells.get(value_index)?.get(statistic_index)?;
        let means: Vec<f64> = runs
            .iter()
            .filter_map(|cell| cell.as_ref().and_then(StatisticValue::mean))
            .collect();
        if means.is_empty() {
            return None;
        }
        Some(means.iter().sum::<f64>() / means.len() as f64)
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub results: ResultSet,
    /// Wall-clock time of every run, value-major; not comparable across machines
    pub wall_clock: Vec<Duration>,
}

impl ExperimentReport {
    /// Total wall-clock time spent inside runs.
    pub fn total_wall_clock(&self) -> Duration {
        self.wall_clock.iter().sum()
    }
}

/// One run of the sweep, ready to execute on any thread.
#[derive(Debug, Clone)]
struct RunJob {
    value_index: usize,
    run_index: usize,
    config: MixSimConfig,
    seed: u64,
}

impl RunJob {
    fn execute(self) -> Result<(RunJob, RunReport, Duration), SimulationError> {
        let started = Instant::now();
        let report = SimulationRun::new(&self.config, self.seed)
            .and_then(SimulationRun::execute)
            .map_err(|source| SimulationError::RunFailed {
                value_index: self.value_index,
                run_index: self.run_index,
                source: Box::new(source),
            })?;
        Ok((self, report, started.elapsed()))
    }
}

/// Parameter sweep over a base scenario.
///
/// # Example
///
/// ```rust,no_run
/// use mixsim_core::config::MixSimConfig;
/// use mixsim_sim::{Experiment, ExperimentConfig, SweepProperty};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExperimentConfig::new(
///     MixSimConfig::for_testing(),
///     SweepProperty::BatchSize,
///     vec![2.0, 4.0, 8.0],
/// );
/// let report = Experiment::new(config)?.run()?;
/// println!("{:?}", report.results.mean(0, 0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    /// Validates the sweep up front so no run starts on a bad scenario.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - The sweep or a produced scenario is invalid
    pub fn new(config: ExperimentConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Number of runs the sweep performs.
    pub fn total_runs(&self) -> usize {
        self.config.values.len() * self.config.runs_per_value
    }

    fn jobs(&self) -> Result<Vec<RunJob>, SimulationError> {
        let mut jobs = Vec::with_capacity(self.total_runs());
        for value_index in 0..self.config.values.len() {
            let config = self.config.scenario(value_index)?;
            for run_index in 0..self.config.runs_per_value {
                jobs.push(RunJob {
                    value_index,
                    run_index,
                    config: config.clone(),
                    seed: self.config.run_seed(value_index, run_index),
                });
            }
        }
        Ok(jobs)
    }

    /// Executes every run on the calling thread, in value-major order.
    ///
    /// # Errors
    ///
    /// - `SimulationError::RunFailed` - A run aborted; the sweep stops there
    pub fn run(&self) -> Result<ExperimentReport, SimulationError> {
        let mut results = ResultSet::empty(&self.config);
        let mut wall_clock = Vec::with_capacity(self.total_runs());

        for job in self.jobs()? {
            if job.run_index == 0 {
                self.log_value(job.value_index);
            }
            let (job, report, elapsed) = job.execute()?;
            results.place(job.value_index, job.run_index, &report);
            wall_clock.push(elapsed);
        }

        tracing::info!(
            "Sweep over {} finished: {} runs",
            self.config.property,
            wall_clock.len()
        );
        Ok(ExperimentReport {
            results,
            wall_clock,
        })
    }

    /// Executes runs in parallel on tokio's blocking pool.
    ///
    /// At most `workers` runs execute at once (all CPUs when `None`).
    /// Results are placed by index, so the result set equals the one of
    /// [`Experiment::run`].
    ///
    /// # Errors
    ///
    /// - `SimulationError::RunFailed` - A run aborted; the first failure in run order is returned
    /// - `SimulationError::ConcurrentRun` - A worker task panicked or was cancelled
    pub async fn run_concurrent(
        &self,
        workers: Option<usize>,
    ) -> Result<ExperimentReport, SimulationError> {
        let workers = workers.unwrap_or_else(num_cpus::get).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        tracing::info!(
            "Sweep over {}: {} runs on {} workers",
            self.config.property,
            self.total_runs(),
            workers
        );

        let tasks: Vec<_> = self
            .jobs()?
            .into_iter()
            .map(|job| {
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| {
                        SimulationError::ConcurrentRun {
                            reason: e.to_string(),
                        }
                    })?;
                    tokio::task::spawn_blocking(move || job.execute())
                        .await
                        .map_err(|e| SimulationError::ConcurrentRun {
                            reason: e.to_string(),
                        })?
                })
            })
            .collect();

        let mut results = ResultSet::empty(&self.config);
        let mut wall_clock = Vec::with_capacity(tasks.len());
        for outcome in futures::future::join_all(tasks).await {
            let (job, report, elapsed) = outcome.map_err(|e| SimulationError::ConcurrentRun {
                reason: e.to_string(),
            })??;
            results.place(job.value_index, job.run_index, &report);
            wall_clock.push(elapsed);
        }

        Ok(ExperimentReport {
            results,
            wall_clock,
        })
    }

    fn log_value(&self, value_index: usize) {
        let value = self.config.values[value_index];
        match &self.config.second {
            Some(second) => tracing::info!(
                "{} = {}, {} = {} ({}/{})",
                self.config.property,
                value,
                second.property,
                second.values[value_index],
                value_index + 1,
                self.config.values.len()
            ),
            None => tracing::info!(
                "{} = {} ({}/{})",
                self.config.property,
                value,
                value_index + 1,
                self.config.values.len()
            ),
        }
    }
}
