//! Properties that hold for every run regardless of seed and topology.

use mixsim_core::config::{MixSimConfig, MixStrategyConfig, TrafficModel};
use mixsim_core::{StatisticType, StatisticValue};
use mixsim_sim::{SimulationRun, StopReason};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Scenario {
    clients: usize,
    mixes: usize,
    messages: u64,
    min_link: u64,
    link_spread: u64,
    max_payload: usize,
    seed: u64,
}

fn scenarios() -> impl Strategy<Value = Scenario> {
    (1usize..6, 1usize..4, 1u64..8, 1u64..20, 0u64..20, 1usize..700, any::<u64>()).prop_map(
        |(clients, mixes, messages, min_link, link_spread, max_payload, seed)| Scenario {
            clients,
            mixes,
            messages,
            min_link,
            link_spread,
            max_payload,
            seed,
        },
    )
}

fn forward_config(scenario: &Scenario) -> MixSimConfig {
    let mut config = MixSimConfig::for_testing();
    config.topology.clients = scenario.clients;
    config.topology.mixes = scenario.mixes;
    config.topology.min_link_delay = scenario.min_link;
    config.topology.max_link_delay = scenario.min_link + scenario.link_spread;
    config.traffic.model = TrafficModel::Poisson { mean_interval: 30 };
    config.traffic.min_payload = 1;
    config.traffic.max_payload = scenario.max_payload;
    config.traffic.messages_per_client = Some(scenario.messages);
    config.mix = MixStrategyConfig::Forward;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_forward_cascade_delivers_every_payload(scenario in scenarios()) {
        let config = forward_config(&scenario);
        let report = SimulationRun::new(&config, scenario.seed)
            .unwrap()
            .execute()
            .unwrap();

        let expected = (scenario.clients as u64 * scenario.messages) as f64;
        prop_assert_eq!(report.stop_reason, StopReason::TraceExhausted);
        prop_assert_eq!(
            report.statistics.counter(StatisticType::PayloadsDelivered),
            expected
        );
        prop_assert!(
            report.statistics.counter(StatisticType::MessagesSent) >= expected
        );

        let links = (scenario.mixes + 1) as f64;
        let Some(StatisticValue::Samples(latencies)) =
            report.statistics.result(StatisticType::EndToEndLatency)
        else {
            return Err(TestCaseError::fail("latency is not a sample set"));
        };
        prop_assert_eq!(latencies.len() as f64, expected);
        let fastest = links * scenario.min_link as f64;
        let slowest = links * (scenario.min_link + scenario.link_spread) as f64;
        let within = latencies
            .iter()
            .all(|latency| *latency >= fastest && *latency <= slowest);
        prop_assert!(within, "latency outside [{}, {}]: {:?}", fastest, slowest, latencies);
    }

    #[test]
    fn prop_runs_replay_from_seed(scenario in scenarios()) {
        let mut config = forward_config(&scenario);
        config.mix = MixStrategyConfig::default();

        let first = SimulationRun::new(&config, scenario.seed).unwrap().execute().unwrap();
        let second = SimulationRun::new(&config, scenario.seed).unwrap().execute().unwrap();

        prop_assert_eq!(first.events_processed, second.events_processed);
        prop_assert_eq!(first.simulated_duration, second.simulated_duration);
        for statistic in StatisticType::ALL {
            prop_assert_eq!(
                first.statistics.result(statistic),
                second.statistics.result(statistic)
            );
        }
    }
}
