//! Live nodes chained over tokio channels run the simulator's strategies.

use std::time::Duration;

use bytes::Bytes;
use mixsim_core::{StatisticType, StatisticValue};
use mixsim_core::config::{
    ClientSendStyle, MixStrategyConfig, StopAndGoConfig, ThresholdBatchConfig,
};
use mixsim_core::live::{LiveNodeConfig, spawn_live_node};
use mixsim_core::message::{Message, ParticipantId, TransportMessage, TransportMessageId};
use mixsim_core::strategy::{ClientStrategy, MixStrategy};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn data(id: u64, len: usize) -> TransportMessage {
    TransportMessage::new(
        TransportMessageId(id),
        ParticipantId(0),
        0,
        Bytes::from(vec![1u8; len]),
    )
}

async fn receive(channel: &mut mpsc::Receiver<Message>) -> Message {
    timeout(Duration::from_secs(5), channel.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

#[tokio::test]
async fn test_client_feeds_batching_mix() {
    let (client_out, mut client_wire) = mpsc::channel(16);
    let (mix_out, mut mix_wire) = mpsc::channel(16);

    let client = spawn_live_node(
        ClientStrategy::from_style(&ClientSendStyle::Immediate),
        LiveNodeConfig {
            capacity: 64,
            ..LiveNodeConfig::default()
        },
        client_out,
    );
    let mix = spawn_live_node(
        MixStrategy::from_config(&MixStrategyConfig::ThresholdBatch(ThresholdBatchConfig {
            threshold: 2,
            timeout: None,
        })),
        LiveNodeConfig {
            owner: ParticipantId(5),
            ..LiveNodeConfig::default()
        },
        mix_out,
    );

    tokio_test::assert_ok!(client.submit_application_data(data(1, 10)).await);
    let first = receive(&mut client_wire).await;
    tokio_test::assert_ok!(mix.deliver_network_message(first).await);
    assert!(mix_wire.try_recv().is_err());

    tokio_test::assert_ok!(client.submit_application_data(data(2, 20)).await);
    let second = receive(&mut client_wire).await;
    tokio_test::assert_ok!(mix.deliver_network_message(second).await);

    let mut released = vec![
        receive(&mut mix_wire).await.used_space(),
        receive(&mut mix_wire).await.used_space(),
    ];
    released.sort_unstable();
    assert_eq!(released, vec![10, 20]);

    let client_statistics = client.statistics().await.unwrap();
    assert_eq!(client_statistics.counter(StatisticType::MessagesSent), 2.0);

    let mix_statistics = mix.statistics().await.unwrap();
    assert_eq!(
        mix_statistics
            .result(StatisticType::BatchSize)
            .and_then(|sizes| sizes.mean()),
        Some(2.0)
    );

    client.shutdown().await.unwrap();
    mix.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mix_rejects_application_data() {
    let (outbound, _wire) = mpsc::channel(4);
    let mix = spawn_live_node(
        MixStrategy::from_config(&MixStrategyConfig::Forward),
        LiveNodeConfig::default(),
        outbound,
    );

    let result = mix.submit_application_data(data(1, 8)).await;
    assert!(result.is_err_and(|e| !e.is_user_error()));
}

#[tokio::test]
async fn test_stamped_client_feeds_stop_and_go_mix() {
    let stop_and_go = StopAndGoConfig {
        mu: 100.0,
        min_inter_mix_delay: 0,
        max_inter_mix_delay: 1000,
        max_clock_deviation: 1000,
        timestamps_enabled: true,
    };
    let (client_out, mut client_wire) = mpsc::channel(16);
    let (mix_out, mut mix_wire) = mpsc::channel(16);

    let client = spawn_live_node(
        ClientStrategy::from_style(&ClientSendStyle::Immediate),
        LiveNodeConfig {
            destination: ParticipantId(9),
            route: vec![ParticipantId(5), ParticipantId(9)],
            stop_and_go: Some(stop_and_go.clone()),
            ..LiveNodeConfig::default()
        },
        client_out,
    );
    let mix = spawn_live_node(
        MixStrategy::from_config(&MixStrategyConfig::StopAndGo(stop_and_go)),
        LiveNodeConfig {
            owner: ParticipantId(5),
            ..LiveNodeConfig::default()
        },
        mix_out,
    );

    tokio_test::assert_ok!(client.submit_application_data(data(1, 10)).await);
    let stamped = receive(&mut client_wire).await;
    assert_eq!(stamped.hop_headers().len(), 1);
    assert_eq!(stamped.route().current_hop_index(), Some(0));
    let delay = stamped.hop_headers()[0].delay_ms as f64;

    tokio_test::assert_ok!(mix.deliver_network_message(stamped).await);
    let released = receive(&mut mix_wire).await;
    assert_eq!(released.used_space(), 10);
    assert_eq!(released.route().next_hop(), None);

    let mix_statistics = mix.statistics().await.unwrap();
    assert_eq!(
        mix_statistics.result(StatisticType::MixHoldingTime),
        Some(StatisticValue::Samples(vec![delay]))
    );
    assert_eq!(mix_statistics.counter(StatisticType::DroppedMessages), 0.0);

    client.shutdown().await.unwrap();
    mix.shutdown().await.unwrap();
}
