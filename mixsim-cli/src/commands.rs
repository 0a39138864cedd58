//! CLI command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use mixsim_core::SimTime;
use mixsim_core::config::{
    BasicSynchronousConfig, ClientSendStyle, EndCondition, MixSimConfig, MixStrategyConfig,
    StopAndGoConfig, ThresholdBatchConfig, WaitForDataConfig,
};
use mixsim_core::statistics::{StatisticType, StatisticValue};
use mixsim_sim::{
    Experiment, ExperimentConfig, ExperimentReport, ResultSet, SecondSweep, SimulationRun,
    SweepProperty,
};

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario and print its statistics
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
    /// Repeat runs while varying one or two properties
    Sweep {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[command(flatten)]
        sweep: SweepArgs,
    },
}

/// Mixing strategy selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MixKind {
    Forward,
    ThresholdBatch,
    StopAndGo,
}

/// Client send style selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SendStyle {
    Immediate,
    BasicSynchronous,
    WaitForData,
    WaitForReply,
}

/// Scenario overrides. Anything not given keeps the environment or default value.
#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    /// Number of clients
    #[arg(long)]
    clients: Option<usize>,

    /// Number of mixes in the cascade
    #[arg(long)]
    mixes: Option<usize>,

    /// Mixing strategy of every mix
    #[arg(long, value_enum)]
    mix_strategy: Option<MixKind>,

    /// Send style of every client
    #[arg(long, value_enum)]
    send_style: Option<SendStyle>,

    /// Batch threshold of a threshold-batch mix
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batch timeout, or the wait-for-data timeout (ms)
    #[arg(long)]
    timeout: Option<SimTime>,

    /// Interval of basic-synchronous clients (ms)
    #[arg(long)]
    send_interval: Option<SimTime>,

    /// Rate of the Stop-and-Go delay (1/s)
    #[arg(long)]
    mu: Option<f64>,

    /// Disable Stop-and-Go arrival windows
    #[arg(long)]
    no_timestamps: bool,

    /// Destination answers every request
    #[arg(long)]
    duplex: bool,

    /// Application messages per client
    #[arg(long)]
    messages_per_client: Option<u64>,

    /// Seed of the run, or root seed of a sweep
    #[arg(long)]
    seed: Option<u64>,

    /// Stop at this simulated time (ms)
    #[arg(long, conflicts_with = "wall_clock_secs")]
    until: Option<SimTime>,

    /// Stop after this many wall-clock seconds; not reproducible
    #[arg(long)]
    wall_clock_secs: Option<u64>,
}

impl ScenarioArgs {
    /// Applies the overrides on top of `MixSimConfig::from_env`.
    pub fn into_config(self) -> MixSimConfig {
        let mut config = MixSimConfig::from_env();

        if let Some(clients) = self.clients {
            config.topology.clients = clients;
        }
        if let Some(mixes) = self.mixes {
            config.topology.mixes = mixes;
        }
        config.topology.duplex |= self.duplex;
        if let Some(messages) = self.messages_per_client {
            config.traffic.messages_per_client = Some(messages);
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if let Some(limit) = self.until {
            config.simulation.end_condition = EndCondition::SimulatedTime { limit };
        }
        if let Some(secs) = self.wall_clock_secs {
            config.simulation.end_condition = EndCondition::WallClock {
                limit: Duration::from_secs(secs),
            };
        }

        if let Some(kind) = self.mix_strategy {
            config.mix = match kind {
                MixKind::Forward => MixStrategyConfig::Forward,
                MixKind::ThresholdBatch => {
                    MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig::default())
                }
                MixKind::StopAndGo => MixStrategyConfig::StopAndGo(StopAndGoConfig::default()),
            };
        }
        match &mut config.mix {
            MixStrategyConfig::ThresholdBatch(batch) => {
                if let Some(size) = self.batch_size {
                    batch.threshold = size;
                }
                if self.timeout.is_some() {
                    batch.timeout = self.timeout;
                }
            }
            MixStrategyConfig::StopAndGo(stop_and_go) => {
                if let Some(mu) = self.mu {
                    stop_and_go.mu = mu;
                }
                stop_and_go.timestamps_enabled &= !self.no_timestamps;
            }
            MixStrategyConfig::Forward => {}
        }

        if let Some(style) = self.send_style {
            config.client = match style {
                SendStyle::Immediate => ClientSendStyle::Immediate,
                SendStyle::BasicSynchronous => ClientSendStyle::BasicSynchronous(
                    BasicSynchronousConfig {
                        interval: self
                            .send_interval
                            .unwrap_or(BasicSynchronousConfig::default().interval),
                    },
                ),
                SendStyle::WaitForData => ClientSendStyle::WaitForData(WaitForDataConfig {
                    timeout: self
                        .timeout
                        .unwrap_or(WaitForDataConfig::default().timeout),
                }),
                SendStyle::WaitForReply => ClientSendStyle::WaitForReply,
            };
        }

        config
    }
}

/// Sweep definition.
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Property varied by the sweep
    #[arg(long, value_enum)]
    property: SweepProperty,

    /// Values of the property
    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    values: Vec<f64>,

    /// Second property, paired by index with the first
    #[arg(long, value_enum, requires = "second_values")]
    second_property: Option<SweepProperty>,

    /// Values of the second property
    #[arg(long, value_delimiter = ',', num_args = 1.., requires = "second_property")]
    second_values: Vec<f64>,

    /// Independent runs per value
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Statistics to collect
    #[arg(long = "stat", value_enum, value_delimiter = ',', default_values_t = [StatisticType::Throughput])]
    statistics: Vec<StatisticType>,

    /// Write the result set as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parallel runs; defaults to the number of CPUs
    #[arg(long)]
    workers: Option<usize>,

    /// Execute runs one after another on the main thread
    #[arg(long, conflicts_with = "workers")]
    sequential: bool,
}

impl SweepArgs {
    fn into_experiment(self, base: MixSimConfig) -> ExperimentConfig {
        let second = self.second_property.map(|property| SecondSweep {
            property,
            values: self.second_values,
        });
        ExperimentConfig {
            second,
            runs_per_value: self.runs,
            statistics: self.statistics,
            ..ExperimentConfig::new(base, self.property, self.values)
        }
    }
}

/// Executes a parsed command.
///
/// # Errors
///
/// - `SimulationError::Config` - The scenario or sweep is invalid
/// - `SimulationError::RunFailed` - A run of the sweep aborted
/// - `std::io::Error` - The output file cannot be written
pub async fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { scenario } => run_scenario(scenario.into_config()),
        Commands::Sweep { scenario, sweep } => {
            let output = sweep.output.clone();
            let workers = sweep.workers;
            let sequential = sweep.sequential;
            let experiment = sweep.into_experiment(scenario.into_config());
            run_sweep(experiment, output.as_deref(), workers, sequential).await
        }
    }
}

/// Runs one scenario and prints a summary.
///
/// # Errors
///
/// - `SimulationError::Config` - The scenario is invalid
/// - `SimulationError::Strategy` - A strategy invariant was violated
pub fn run_scenario(config: MixSimConfig) -> anyhow::Result<()> {
    let seed = config.simulation.seed;
    tracing::info!(
        "Running {} clients ({}) through {} mixes ({}), seed {}",
        config.topology.clients,
        config.client.name(),
        config.topology.mixes,
        config.mix.name(),
        seed
    );

    let report = SimulationRun::new(&config, seed)
        .and_then(SimulationRun::execute)
        .with_context(|| format!("Run with seed {seed} failed"))?;

    println!("Simulation Summary");
    println!("{:-<60}", "");
    println!("Seed: {}", report.seed);
    println!("Stop reason: {:?}", report.stop_reason);
    println!("Simulated time: {} ms", report.simulated_duration);
    println!("Events processed: {}", report.events_processed);
    println!(
        "Participants: {} clients, {} mixes",
        report.number_of_clients, report.number_of_mixes
    );
    println!();
    for statistic in StatisticType::ALL {
        if let Some(value) = report.statistics.result(statistic) {
            println!("{:<24} {}", statistic.as_str(), describe(&value));
        }
    }

    Ok(())
}

/// Runs a sweep, prints per-value means and optionally writes JSON.
///
/// # Errors
///
/// - `SimulationError::Config` - The sweep or a produced scenario is invalid
/// - `SimulationError::RunFailed` - A run aborted
/// - `SimulationError::ConcurrentRun` - A worker task panicked
/// - `std::io::Error` - `output` cannot be written
pub async fn run_sweep(
    config: ExperimentConfig,
    output: Option<&Path>,
    workers: Option<usize>,
    sequential: bool,
) -> anyhow::Result<()> {
    let experiment = Experiment::new(config.clone()).context("Invalid sweep")?;

    let report = if sequential {
        experiment.run()?
    } else {
        experiment.run_concurrent(workers).await?
    };

    print_results(&report);

    if let Some(path) = output {
        write_results(path, &config, &report.results).await?;
        println!("\nResults written to {}", path.display());
    }
    Ok(())
}

fn print_results(report: &ExperimentReport) {
    let results = &report.results;
    println!("Sweep over {}", results.property);
    println!("{:-<60}", "");

    for (value_index, value) in results.values.iter().enumerate() {
        let mut line = format!("{} = {}", results.property, value);
        if let (Some(property), Some(values)) = (&results.second_property, &results.second_values)
        {
            line.push_str(&format!(", {} = {}", property, values[value_index]));
        }
        println!("{line}");

        for (statistic_index, statistic) in results.statistics.iter().enumerate() {
            match results.mean(value_index, statistic_index) {
                Some(mean) => println!("  {:<24} {:.3}", statistic.as_str(), mean),
                None => println!("  {:<24} -", statistic.as_str()),
            }
        }
    }

    println!(
        "\n{} runs in {:.2}s of run time",
        report.wall_clock.len(),
        report.total_wall_clock().as_secs_f64()
    );
}

/// Writes the result set and the sweep that produced it as JSON.
///
/// # Errors
///
/// - `serde_json::Error` - The results cannot be serialized
/// - `std::io::Error` - The file cannot be created or written
pub async fn write_results(
    path: &Path,
    config: &ExperimentConfig,
    results: &ResultSet,
) -> anyhow::Result<()> {
    let document = serde_json::json!({
        "generatedAt": chrono::Utc::now().to_rfc3339(),
        "experiment": config,
        "results": results,
    });
    let text = serde_json::to_string_pretty(&document)?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote results to {}", path.display());
    Ok(())
}

fn describe(value: &StatisticValue) -> String {
    match value {
        StatisticValue::Scalar(scalar) => format!("{scalar:.3}"),
        StatisticValue::Samples(samples) => match value.mean() {
            Some(mean) => format!("mean {mean:.3} over {} samples", samples.len()),
            None => "no samples".to_string(),
        },
    }
}
