//! Scheduler behavior: ordering, cancellation, re-basing.

use proptest::prelude::*;

use super::*;
use crate::SimulationError;

fn stop_at(scheduler: &mut Scheduler, at: u64) -> EventId {
    scheduler
        .schedule(at, EventTarget::Run, EventKind::Stop, None)
        .unwrap()
}

fn drain(scheduler: &mut Scheduler, limit: Option<u64>) -> Vec<EventId> {
    std::iter::from_fn(|| scheduler.pop_due(limit).unwrap())
        .map(|event| event.id)
        .collect()
}

#[test]
fn test_equal_times_run_in_scheduling_order() {
    let mut scheduler = Scheduler::new();
    let first = stop_at(&mut scheduler, 10);
    let second = stop_at(&mut scheduler, 10);
    let earlier = stop_at(&mut scheduler, 5);

    assert_eq!(drain(&mut scheduler, None), vec![earlier, first, second]);
    assert_eq!(scheduler.now(), 10);
}

#[test]
fn test_scheduling_in_the_past_is_fatal() {
    let mut scheduler = Scheduler::new();
    stop_at(&mut scheduler, 20);
    drain(&mut scheduler, None);

    let result = scheduler.schedule(19, EventTarget::Run, EventKind::Stop, None);
    assert!(matches!(
        result,
        Err(SimulationError::EventInPast { at: 19, now: 20 })
    ));

    // Scheduling at the current time is allowed.
    assert!(
        scheduler
            .schedule(20, EventTarget::Run, EventKind::Stop, None)
            .is_ok()
    );
}

#[test]
fn test_cancel_is_idempotent() {
    let mut scheduler = Scheduler::new();
    let canceled = stop_at(&mut scheduler, 10);
    let kept = stop_at(&mut scheduler, 20);

    assert!(scheduler.cancel(canceled));
    assert!(!scheduler.cancel(canceled));
    assert!(!scheduler.cancel(EventId(999)));
    assert_eq!(scheduler.pending(), 1);

    assert_eq!(drain(&mut scheduler, None), vec![kept]);
    assert!(!scheduler.cancel(kept));
    assert!(scheduler.is_empty());
}

#[test]
fn test_pop_due_leaves_later_events_queued() {
    let mut scheduler = Scheduler::new();
    let due = stop_at(&mut scheduler, 100);
    let boundary = stop_at(&mut scheduler, 150);
    let later = stop_at(&mut scheduler, 151);

    assert_eq!(drain(&mut scheduler, Some(150)), vec![due, boundary]);
    assert_eq!(scheduler.pending(), 1);
    assert_eq!(scheduler.now(), 150);

    assert_eq!(drain(&mut scheduler, None), vec![later]);
}

#[test]
fn test_canceled_event_at_top_does_not_block_limit_check() {
    let mut scheduler = Scheduler::new();
    let dead = stop_at(&mut scheduler, 5);
    let live = stop_at(&mut scheduler, 8);
    scheduler.cancel(dead);

    assert_eq!(drain(&mut scheduler, Some(6)), Vec::<EventId>::new());
    assert_eq!(scheduler.now(), 0);
    assert_eq!(drain(&mut scheduler, Some(8)), vec![live]);
}

#[test]
fn test_sequence_rebase_preserves_order() {
    let mut scheduler = Scheduler::with_sequence_limit(4);
    let a = stop_at(&mut scheduler, 10);
    let b = stop_at(&mut scheduler, 10);
    let c = stop_at(&mut scheduler, 10);
    scheduler.cancel(b);
    let d = stop_at(&mut scheduler, 10);
    // Counter is exhausted here; re-basing packs a, c, d into 0..3.
    let e = stop_at(&mut scheduler, 10);

    assert_eq!(drain(&mut scheduler, None), vec![a, c, d, e]);
}

#[test]
fn test_rebase_fails_when_queue_fills_sequence_space() {
    let mut scheduler = Scheduler::with_sequence_limit(2);
    stop_at(&mut scheduler, 1);
    stop_at(&mut scheduler, 2);

    let result = scheduler.schedule(3, EventTarget::Run, EventKind::Stop, None);
    assert!(matches!(
        result,
        Err(SimulationError::SequenceExhausted { pending: 2 })
    ));
    assert_eq!(scheduler.pending(), 2);
}

proptest! {
    #[test]
    fn prop_execution_order_is_time_then_scheduling_order(
        times in prop::collection::vec(0u64..50, 1..60),
    ) {
        let mut scheduler = Scheduler::new();
        let mut expected: Vec<(u64, EventId)> = times
            .iter()
            .map(|&at| (at, stop_at(&mut scheduler, at)))
            .collect();
        expected.sort_by_key(|(at, id)| (*at, *id));

        let executed = drain(&mut scheduler, None);
        let expected_ids: Vec<EventId> = expected.into_iter().map(|(_, id)| id).collect();
        prop_assert_eq!(executed, expected_ids);
    }

    #[test]
    fn prop_rebasing_keeps_scheduling_order_for_equal_times(
        deltas in prop::collection::vec(0u64..5, 1..80),
        limit in 3u64..10,
    ) {
        let mut scheduler = Scheduler::with_sequence_limit(limit);
        let mut executed = Vec::new();
        for delta in deltas {
            if scheduler.pending() as u64 >= limit - 1 {
                executed.extend(scheduler.pop_due(None).unwrap());
            }
            scheduler
                .schedule_in(delta, EventTarget::Run, EventKind::Stop, None)
                .unwrap();
        }
        while let Some(event) = scheduler.pop_due(None).unwrap() {
            executed.push(event);
        }

        for pair in executed.windows(2) {
            prop_assert!((pair[0].time(), pair[0].id) < (pair[1].time(), pair[1].id));
        }
    }

    #[test]
    fn prop_clock_never_moves_backwards(
        times in prop::collection::vec(0u64..1000, 1..40),
    ) {
        let mut scheduler = Scheduler::new();
        for &at in &times {
            stop_at(&mut scheduler, at);
        }
        let mut last = 0;
        while let Some(event) = scheduler.pop_due(None).unwrap() {
            prop_assert!(event.time() >= last);
            prop_assert_eq!(scheduler.now(), event.time());
            last = event.time();
        }
    }

    #[test]
    fn prop_canceled_events_never_execute(
        times in prop::collection::vec(0u64..100, 1..40),
        cancel_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let mut scheduler = Scheduler::new();
        let ids: Vec<EventId> = times.iter().map(|&at| stop_at(&mut scheduler, at)).collect();
        let canceled: Vec<EventId> = ids
            .iter()
            .zip(&cancel_mask)
            .filter(|(_, cancel)| **cancel)
            .map(|(id, _)| *id)
            .collect();
        for id in &canceled {
            scheduler.cancel(*id);
        }

        let executed = drain(&mut scheduler, None);
        prop_assert_eq!(executed.len(), ids.len() - canceled.len());
        prop_assert!(executed.iter().all(|id| !canceled.contains(id)));
    }
}
