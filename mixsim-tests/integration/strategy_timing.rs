//! Timing of complete scenarios with fixed link latency.
//!
//! Every link takes exactly 10 ms and traffic ticks are far apart, so
//! latencies follow directly from the strategy parameters.

use mixsim_core::config::{
    ClientSendStyle, MixSimConfig, MixStrategyConfig, StopAndGoConfig, ThresholdBatchConfig,
    TrafficModel, WaitForDataConfig,
};
use mixsim_core::{StatisticType, StatisticValue};
use mixsim_sim::{RunReport, SimulationRun};

fn run(config: &MixSimConfig) -> RunReport {
    SimulationRun::new(config, config.simulation.seed)
        .unwrap()
        .execute()
        .unwrap()
}

fn sparse_traffic(clients: usize, mixes: usize) -> MixSimConfig {
    let mut config = MixSimConfig::for_testing();
    config.topology.clients = clients;
    config.topology.mixes = mixes;
    config.traffic.model = TrafficModel::ConstantRate { interval: 1000 };
    config.traffic.messages_per_client = Some(3);
    config
}

fn samples(report: &RunReport, statistic: StatisticType) -> Vec<f64> {
    match report.statistics.result(statistic) {
        Some(StatisticValue::Samples(samples)) => samples,
        other => panic!("{statistic} is not a sample set: {other:?}"),
    }
}

#[test]
fn test_batch_released_by_timeout_below_threshold() {
    let mut config = sparse_traffic(2, 1);
    config.mix = MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
        threshold: 10,
        timeout: Some(100),
    });

    let report = run(&config);

    assert_eq!(samples(&report, StatisticType::BatchSize), vec![2.0; 3]);
    assert_eq!(samples(&report, StatisticType::MixHoldingTime), vec![100.0; 6]);
    // Link in, timeout, link out
    assert_eq!(samples(&report, StatisticType::EndToEndLatency), vec![120.0; 6]);
}

#[test]
fn test_batch_released_on_reaching_threshold() {
    let mut config = sparse_traffic(2, 1);
    config.mix = MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
        threshold: 2,
        timeout: Some(100),
    });

    let report = run(&config);

    assert_eq!(samples(&report, StatisticType::BatchSize), vec![2.0; 3]);
    assert_eq!(samples(&report, StatisticType::EndToEndLatency), vec![20.0; 6]);
}

#[test]
fn test_wait_for_data_holds_until_timeout() {
    let mut config = sparse_traffic(1, 2);
    config.mix = MixStrategyConfig::Forward;
    config.client = ClientSendStyle::WaitForData(WaitForDataConfig { timeout: 20 });

    let report = run(&config);

    assert_eq!(report.statistics.counter(StatisticType::MessagesSent), 3.0);
    assert_eq!(
        report.statistics.counter(StatisticType::DummyMessagesSent),
        0.0
    );
    // Timeout plus three links
    assert_eq!(samples(&report, StatisticType::EndToEndLatency), vec![50.0; 3]);
}

#[test]
fn test_stop_and_go_without_timestamps_never_drops() {
    let mut config = MixSimConfig::for_testing();
    config.topology.min_link_delay = 50;
    config.topology.max_link_delay = 50;
    config.simulation.drain_period = 5000;
    config.mix = MixStrategyConfig::StopAndGo(StopAndGoConfig {
        mu: 20.0,
        min_inter_mix_delay: 5,
        max_inter_mix_delay: 5,
        max_clock_deviation: 0,
        timestamps_enabled: false,
    });

    let report = run(&config);

    assert_eq!(
        report.statistics.counter(StatisticType::DroppedMessages),
        0.0
    );
    assert_eq!(
        report.statistics.counter(StatisticType::PayloadsDelivered),
        40.0
    );
    // Every delivered payload spent at least the three links in flight
    assert!(
        samples(&report, StatisticType::EndToEndLatency)
            .iter()
            .all(|latency| *latency >= 150.0)
    );
}
