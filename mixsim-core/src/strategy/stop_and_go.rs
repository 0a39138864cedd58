//! Stop-and-Go mixing: per-hop exponential delays chosen by the sender.

use rand::RngCore;
use rand_distr::{Distribution, Exp};

use super::{FiredTimer, Strategy, StrategyContext, StrategyError, TimerKind};
use crate::SimTime;
use crate::config::StopAndGoConfig;
use crate::message::{ArrivalWindow, HopHeader, Message};
use crate::statistics::StatisticType;

/// Draws per-hop delays for `message` and writes them into its headers.
///
/// One header is stamped for each of the first `mix_hops` hops of the route.
/// Delays are exponential with rate `mu` per second, rounded to whole
/// milliseconds. With timestamps enabled, each header also carries the
/// window in which the message may legitimately reach that hop: the sum of
/// the preceding hop delays plus the inter-mix latency bounds, widened by
/// the tolerated clock deviation.
///
/// # Errors
///
/// - `StrategyError::InvalidParameter` - `mu` is not a positive finite rate
pub fn stamp_hop_headers(
    config: &StopAndGoConfig,
    message: &mut Message,
    mix_hops: usize,
    now: SimTime,
    rng: &mut dyn RngCore,
) -> Result<(), StrategyError> {
    if !(config.mu > 0.0 && config.mu.is_finite()) {
        return Err(StrategyError::InvalidParameter {
            reason: format!("stop-and-go mu must be positive, got {}", config.mu),
        });
    }
    let exp = Exp::new(config.mu / 1000.0).map_err(|e| StrategyError::InvalidParameter {
        reason: format!("stop-and-go mu {}: {e}", config.mu),
    })?;

    let mut headers = Vec::with_capacity(mix_hops);
    let mut held_before: SimTime = 0;
    for hop in 0..mix_hops {
        let delay_ms = exp.sample(rng).round() as u64;
        let links = hop as SimTime + 1;

        let window = config.timestamps_enabled.then(|| ArrivalWindow {
            earliest: (now + held_before + links * config.min_inter_mix_delay)
                .saturating_sub(config.max_clock_deviation),
            latest: now
                + held_before
                + links * config.max_inter_mix_delay
                + config.max_clock_deviation,
        });

        headers.push(HopHeader { delay_ms, window });
        held_before += delay_ms;
    }

    message.stamp_hop_headers(headers);
    Ok(())
}

/// Mix side of Stop-and-Go.
///
/// Holds each message for exactly the delay its sender chose for this hop.
/// Messages reaching the hop outside their arrival window are dropped and
/// counted.
#[derive(Debug)]
pub struct StopAndGo {
    config: StopAndGoConfig,
}

impl StopAndGo {
    pub fn new(config: &StopAndGoConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Strategy for StopAndGo {
    fn name(&self) -> &'static str {
        "stop-and-go"
    }

    fn on_incoming_network_message(
        &mut self,
        ctx: &mut dyn StrategyContext,
        message: Message,
    ) -> Result<(), StrategyError> {
        let header = current_header(&message)?;

        let now = ctx.now();
        if self.config.timestamps_enabled
            && let Some(window) = header.window.filter(|window| !window.contains(now))
        {
            tracing::warn!(
                "{} dropping {} at {}: outside window {}..={}",
                ctx.owner(),
                message.id(),
                now,
                window.earliest,
                window.latest
            );
            ctx.record(StatisticType::DroppedMessages, 1.0);
            return Ok(());
        }

        ctx.schedule_timer(now + header.delay_ms, TimerKind::Release, Some(message))?;
        Ok(())
    }

    fn on_timer_fired(
        &mut self,
        ctx: &mut dyn StrategyContext,
        timer: FiredTimer,
    ) -> Result<(), StrategyError> {
        if timer.kind != TimerKind::Release {
            return Err(StrategyError::UnexpectedTimer {
                strategy: self.name(),
                kind: timer.kind,
            });
        }
        let message = timer.attachment.ok_or(StrategyError::MissingAttachment)?;

        let held = current_header(&message)?.delay_ms;
        ctx.record(StatisticType::MixHoldingTime, held as f64);
        ctx.send(message)
    }
}

/// Header of the hop currently holding `message`.
fn current_header(message: &Message) -> Result<HopHeader, StrategyError> {
    let hop = message
        .route()
        .current_hop_index()
        .ok_or(StrategyError::NotOnRoute {
            message: message.id(),
        })?;
    message
        .hop_header(hop)
        .copied()
        .ok_or(StrategyError::MissingHopHeader {
            message: message.id(),
            hop,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, ParticipantId, Route};
    use crate::statistics::StatisticValue;
    use crate::strategy::testing::RecordingContext;

    fn config(timestamps_enabled: bool) -> StopAndGoConfig {
        StopAndGoConfig {
            mu: 10.0,
            min_inter_mix_delay: 5,
            max_inter_mix_delay: 20,
            max_clock_deviation: 10,
            timestamps_enabled,
        }
    }

    /// Message as it looks on arrival at the first mix of a two-mix cascade.
    fn arriving(ctx: &mut RecordingContext, headers: Vec<HopHeader>) -> Message {
        let mut message = ctx.new_message(Direction::Request);
        let mut route = Route::new(vec![ParticipantId(10), ParticipantId(11), ParticipantId(99)]);
        route.advance();
        message.assign_route(route);
        message.stamp_hop_headers(headers);
        message
    }

    #[test]
    fn test_stamp_writes_one_header_per_mix() {
        let mut ctx = RecordingContext::new(32);
        let mut message = ctx.new_message(Direction::Request);
        stamp_hop_headers(&config(true), &mut message, 3, 100, ctx.rng()).unwrap();

        let headers = message.hop_headers().to_vec();
        assert_eq!(headers.len(), 3);

        let first = headers[0].window.unwrap();
        assert_eq!(first.earliest, 95);
        assert_eq!(first.latest, 130);

        let second = headers[1].window.unwrap();
        assert_eq!(second.earliest, 100 + headers[0].delay_ms + 10 - 10);
        assert_eq!(second.latest, 100 + headers[0].delay_ms + 40 + 10);
    }

    #[test]
    fn test_stamp_without_timestamps_has_no_windows() {
        let mut ctx = RecordingContext::new(32);
        let mut message = ctx.new_message(Direction::Request);
        stamp_hop_headers(&config(false), &mut message, 2, 0, ctx.rng()).unwrap();
        assert!(message.hop_headers().iter().all(|h| h.window.is_none()));
    }

    #[test]
    fn test_stamp_rejects_non_positive_rate() {
        let mut ctx = RecordingContext::new(32);
        let mut message = ctx.new_message(Direction::Request);
        let mut bad = config(true);
        bad.mu = -1.0;
        let result = stamp_hop_headers(&bad, &mut message, 2, 0, ctx.rng());
        assert!(matches!(result, Err(StrategyError::InvalidParameter { .. })));
    }

    #[test]
    fn test_mix_releases_after_header_delay() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(true));
        ctx.now = 50;
        let header = HopHeader {
            delay_ms: 37,
            window: Some(ArrivalWindow {
                earliest: 40,
                latest: 60,
            }),
        };
        let message = arriving(&mut ctx, vec![header]);
        mix.on_incoming_network_message(&mut ctx, message).unwrap();

        assert!(ctx.sent.is_empty());
        assert_eq!(ctx.next_timer_at(), Some(87));

        ctx.advance_to(&mut mix, 100).unwrap();
        assert_eq!(ctx.sent.len(), 1);
        assert_eq!(ctx.sent[0].0, 87);
        assert_eq!(
            ctx.statistics.result(StatisticType::MixHoldingTime),
            Some(StatisticValue::Samples(vec![37.0]))
        );
    }

    #[test]
    fn test_mix_drops_and_counts_late_message() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(true));
        ctx.now = 61;
        let header = HopHeader {
            delay_ms: 5,
            window: Some(ArrivalWindow {
                earliest: 40,
                latest: 60,
            }),
        };
        let message = arriving(&mut ctx, vec![header]);
        mix.on_incoming_network_message(&mut ctx, message).unwrap();

        assert_eq!(ctx.pending_timers(), 0);
        assert_eq!(ctx.statistics.counter(StatisticType::DroppedMessages), 1.0);
    }

    #[test]
    fn test_disabled_timestamps_ignore_window() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(false));
        ctx.now = 500;
        let header = HopHeader {
            delay_ms: 5,
            window: Some(ArrivalWindow {
                earliest: 40,
                latest: 60,
            }),
        };
        let message = arriving(&mut ctx, vec![header]);
        mix.on_incoming_network_message(&mut ctx, message).unwrap();
        assert_eq!(ctx.pending_timers(), 1);
    }

    #[test]
    fn test_missing_header_is_fatal() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(true));
        let message = arriving(&mut ctx, Vec::new());
        let result = mix.on_incoming_network_message(&mut ctx, message);
        assert!(matches!(
            result,
            Err(StrategyError::MissingHopHeader { hop: 0, .. })
        ));
    }

    #[test]
    fn test_message_before_first_hop_is_fatal() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(true));
        let mut message = ctx.new_message(Direction::Request);
        message.assign_route(Route::new(vec![ParticipantId(10), ParticipantId(99)]));
        message.stamp_hop_headers(vec![HopHeader {
            delay_ms: 5,
            window: None,
        }]);

        let result = mix.on_incoming_network_message(&mut ctx, message);
        assert!(matches!(result, Err(StrategyError::NotOnRoute { .. })));
        assert_eq!(ctx.pending_timers(), 0);
    }

    #[test]
    fn test_release_without_attachment_is_fatal() {
        let mut ctx = RecordingContext::new(32);
        let mut mix = StopAndGo::new(&config(true));
        let result = mix.on_timer_fired(
            &mut ctx,
            FiredTimer {
                handle: crate::strategy::TimerHandle(3),
                kind: TimerKind::Release,
                attachment: None,
            },
        );
        assert_eq!(result, Err(StrategyError::MissingAttachment));
    }
}
