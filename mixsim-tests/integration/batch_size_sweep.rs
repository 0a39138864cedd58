//! End-to-end sweeps through the public experiment API.

use mixsim_core::config::{MixSimConfig, MixStrategyConfig, ThresholdBatchConfig};
use mixsim_core::statistics::StatisticType;
use mixsim_sim::{Experiment, ExperimentConfig, SimulationError, SweepProperty};

fn fifty_client_base() -> MixSimConfig {
    let mut base = MixSimConfig::for_testing();
    base.topology.clients = 50;
    base.topology.mixes = 3;
    base.traffic.messages_per_client = Some(4);
    // Partial batches wait for up to three timeouts on the way out
    base.simulation.drain_period = 5000;
    base.mix = MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
        threshold: 10,
        timeout: Some(300),
    });
    base
}

fn batch_size_sweep() -> ExperimentConfig {
    ExperimentConfig::new(
        fifty_client_base(),
        SweepProperty::BatchSize,
        vec![10.0, 20.0, 30.0, 40.0, 50.0],
    )
}

#[test]
fn test_batch_size_sweep_populates_every_cell() {
    let config = batch_size_sweep();
    assert_eq!(config.runs_per_value, 1);
    assert_eq!(config.statistics, vec![StatisticType::Throughput]);

    let report = Experiment::new(config).unwrap().run().unwrap();
    let results = &report.results;

    assert_eq!(results.values, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
    assert_eq!(results.number_of_clients, vec![50; 5]);
    assert_eq!(results.number_of_mixes, vec![3; 5]);
    for value_index in 0..results.values.len() {
        let throughput = results
            .cell(value_index, 0, 0)
            .and_then(|value| value.mean());
        assert!(
            throughput.is_some_and(|rate| rate > 0.0),
            "no throughput for batch size {}",
            results.values[value_index]
        );
    }
}

#[test]
fn test_every_batch_size_delivers_the_full_trace() {
    let config = ExperimentConfig {
        statistics: vec![StatisticType::PayloadsDelivered, StatisticType::BatchSize],
        ..batch_size_sweep()
    };

    let results = Experiment::new(config).unwrap().run().unwrap().results;

    for value_index in 0..results.values.len() {
        assert_eq!(results.mean(value_index, 0), Some(200.0));
        let largest = match results.cell(value_index, 1, 0) {
            Some(mixsim_core::StatisticValue::Samples(sizes)) => {
                sizes.iter().copied().fold(0.0, f64::max)
            }
            other => panic!("unexpected batch sizes {other:?}"),
        };
        assert!(largest <= results.values[value_index]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sweep_is_order_independent() {
    let config = ExperimentConfig {
        runs_per_value: 2,
        ..batch_size_sweep()
    };
    let experiment = Experiment::new(config).unwrap();

    let sequential = experiment.run().unwrap();
    let concurrent = experiment.run_concurrent(Some(3)).await.unwrap();

    assert_eq!(sequential.results, concurrent.results);
    assert_eq!(concurrent.wall_clock.len(), experiment.total_runs());
}

#[test]
fn test_sweep_rejects_property_missing_from_scenario() {
    let mut base = fifty_client_base();
    base.mix = MixStrategyConfig::Forward;
    let config = ExperimentConfig::new(base, SweepProperty::BatchSize, vec![10.0]);

    let error = Experiment::new(config).unwrap_err();
    assert!(matches!(error, SimulationError::Config(_)));
    assert!(error.is_user_error());
}

#[test]
fn test_result_json_has_one_entry_per_value() {
    let report = Experiment::new(batch_size_sweep()).unwrap().run().unwrap();
    let json = serde_json::to_value(&report.results).unwrap();

    assert_eq!(json["property"], "BATCH_SIZE");
    assert_eq!(json["numberOfClients"].as_array().map(Vec::len), Some(5));
    assert!(
        json["cells"]
            .as_array()
            .unwrap()
            .iter()
            .all(|statistics| !statistics[0][0].is_null())
    );
}
