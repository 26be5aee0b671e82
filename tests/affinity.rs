//! Integration tests for worker affinity
//!
//! - Producers placed by queue scan at construction time
//! - Downstream nodes placed round-robin from the emitting node's worker
//! - Every callback runs on the node's pinned worker, and pins never move

mod common;

use common::builders::{counting_producer, map_transform, RecorderBuilder};
use common::{test_runtime, EventLog};
use proptest::prelude::*;
use std::time::Duration;
use streamflow_rs::runtime::{Task, TaskKind};
use streamflow_rs::{AffinityFallback, NodeRef, Runtime, RuntimeConfig, StreamError, WorkerId};

fn runtime_with(workers: usize, fallback: AffinityFallback) -> Runtime {
    let mut config = RuntimeConfig::with_workers(workers);
    config.idle_poll_ms = 1;
    config.affinity_fallback = fallback;
    Runtime::new(config)
}

/// Assert every recorded event for `node` ran on its pinned worker.
fn assert_ran_on_affinity(log: &EventLog, node: &NodeRef) {
    let pinned = node.affinity().expect("node was never scheduled");
    for event in log.for_node(node.name()) {
        assert_eq!(event.worker(), pinned, "{} ran off its worker", node.name());
    }
}

#[test]
fn test_round_robin_along_a_chain() {
    let runtime = test_runtime(3);
    let log = EventLog::new();

    let p = counting_producer("p", 3);
    let c = map_transform("c", &log, |v| v + 1);
    let d = map_transform("d", &log, |v| v + 1);
    let e = RecorderBuilder::new("e", &log).build();

    runtime.connect(&p, &c).unwrap();
    runtime.connect(&c, &d).unwrap();
    runtime.connect(&d, &e).unwrap();
    runtime.run().unwrap();

    assert_eq!(p.affinity(), Some(WorkerId(0)));
    assert_eq!(c.affinity(), Some(WorkerId(1)));
    assert_eq!(d.affinity(), Some(WorkerId(2)));
    assert_eq!(e.affinity(), Some(WorkerId(0)));

    for node in [&c, &d, &e] {
        assert_ran_on_affinity(&log, node);
    }
    assert_eq!(log.values_for("e"), vec![3, 4, 5]);
    runtime.shutdown();
}

#[test]
fn test_fan_out_destinations_follow_source_worker() {
    let runtime = test_runtime(4);
    let log = EventLog::new();

    let p = counting_producer("p", 2);
    let sinks: Vec<_> = (0..3)
        .map(|i| RecorderBuilder::new(&format!("s{i}"), &log).build())
        .collect();
    for sink in &sinks {
        runtime.connect(&p, sink).unwrap();
    }
    runtime.run().unwrap();

    let source = p.affinity().unwrap();
    for sink in &sinks {
        assert_eq!(sink.affinity(), Some(source.next(4)));
        assert_ran_on_affinity(&log, sink);
    }
    runtime.shutdown();
}

#[test]
fn test_producers_take_idle_workers_first() {
    let runtime = test_runtime(3);
    let log = EventLog::new();

    let producers: Vec<_> = (0..3).map(|i| counting_producer(&format!("p{i}"), 1)).collect();
    for (i, p) in producers.iter().enumerate() {
        let sink = RecorderBuilder::new(&format!("s{i}"), &log).build();
        runtime.connect(p, &sink).unwrap();
    }

    // Workers are held until run(), so each start task occupies its queue
    let placed: Vec<_> = producers.iter().map(|p| p.affinity().unwrap()).collect();
    assert_eq!(placed, vec![WorkerId(0), WorkerId(1), WorkerId(2)]);

    runtime.run().unwrap();
    runtime.shutdown();
}

fn place_four_producers(fallback: AffinityFallback) -> Vec<WorkerId> {
    let runtime = runtime_with(2, fallback);
    let log = EventLog::new();

    let producers: Vec<_> = (0..4).map(|i| counting_producer(&format!("p{i}"), 1)).collect();
    for (i, p) in producers.iter().enumerate() {
        let sink = RecorderBuilder::new(&format!("s{i}"), &log).build();
        runtime.connect(p, &sink).unwrap();
    }
    let placed = producers.iter().map(|p| p.affinity().unwrap()).collect();

    runtime.run().unwrap();
    runtime.shutdown();
    placed
}

#[test]
fn test_busiest_fallback_when_no_worker_idle() {
    // [0,0] -> w0, [1,0] -> w1, [1,1] -> w0 (tie), [2,1] -> w0 (busiest)
    assert_eq!(
        place_four_producers(AffinityFallback::Busiest),
        vec![WorkerId(0), WorkerId(1), WorkerId(0), WorkerId(0)]
    );
}

#[test]
fn test_least_loaded_fallback_when_no_worker_idle() {
    // [0,0] -> w0, [1,0] -> w1, [1,1] -> w0 (tie), [2,1] -> w1 (least loaded)
    assert_eq!(
        place_four_producers(AffinityFallback::LeastLoaded),
        vec![WorkerId(0), WorkerId(1), WorkerId(0), WorkerId(1)]
    );
}

#[test]
fn test_single_worker_pool_pins_everything_to_zero() {
    let runtime = test_runtime(1);
    let log = EventLog::new();

    let p = counting_producer("p", 3);
    let t = map_transform("t", &log, |v| v * 10);
    let s = RecorderBuilder::new("s", &log).build();
    runtime.connect(&p, &t).unwrap();
    runtime.connect(&t, &s).unwrap();
    runtime.run().unwrap();

    for node in [&p, &t, &s] {
        assert_eq!(node.affinity(), Some(WorkerId(0)));
    }
    assert_eq!(log.values_for("s"), vec![10, 20, 30]);
    runtime.shutdown();
}

#[test]
fn test_node_stays_with_its_first_runtime() {
    let log = EventLog::new();
    let shared = RecorderBuilder::new("shared", &log).build();

    let first = test_runtime(1);
    first.connect(&counting_producer("p1", 2), &shared).unwrap();
    first.run().unwrap();
    assert_eq!(shared.owner(), Some(first.id()));

    let second = test_runtime(1);
    let err = second
        .connect(&counting_producer("p2", 2), &shared)
        .unwrap_err();
    assert!(matches!(err, StreamError::ForeignNode { .. }));

    // Direct pushes are refused as well, so no second thread ever runs it
    second.init_pool().unwrap();
    let err = second
        .push(Task::new(shared.clone(), TaskKind::Start, None), None)
        .unwrap_err();
    assert!(matches!(err, StreamError::ForeignNode { .. }));

    assert!(second.run_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(log.values_for("shared"), vec![1, 2]);
    let workers: std::collections::HashSet<_> =
        log.for_node("shared").iter().map(|e| e.worker()).collect();
    assert_eq!(workers.len(), 1);

    first.shutdown();
    second.shutdown();
}

#[test]
fn test_pin_from_larger_pool_is_not_reused_by_smaller_one() {
    let log = EventLog::new();
    let sink = RecorderBuilder::new("sink", &log).build();

    let wide = test_runtime(4);
    wide.connect(&counting_producer("p", 1), &sink).unwrap();
    wide.run().unwrap();
    assert!(sink.affinity().unwrap().index() >= 1);

    let narrow = test_runtime(1);
    let err = narrow.connect(&counting_producer("q", 1), &sink).unwrap_err();
    assert!(matches!(err, StreamError::ForeignNode { .. }));

    // Nothing was registered, so the narrow runtime quiesces at once
    assert!(narrow.run_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(narrow.stats().total_failures(), 0);

    wide.shutdown();
    narrow.shutdown();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_fan_out_delivers_in_order_on_pinned_workers(
        workers in 1usize..5,
        width in 1usize..5,
        values in 0u64..8,
    ) {
        let runtime = test_runtime(workers);
        let log = EventLog::new();

        let p = counting_producer("p", values);
        let sinks: Vec<_> = (0..width)
            .map(|i| RecorderBuilder::new(&format!("s{i}"), &log).build())
            .collect();
        for sink in &sinks {
            runtime.connect(&p, sink).unwrap();
        }
        runtime.run().unwrap();

        let expected: Vec<u64> = (1..=values).collect();
        for sink in &sinks {
            // Property: each destination sees every emission, in order, then one close
            prop_assert_eq!(log.values_for(sink.name()), expected.clone());
            prop_assert_eq!(log.closes_for(sink.name()), 1);

            // Property: all of a node's callbacks ran on its single pinned worker
            let pinned = sink.affinity().unwrap();
            prop_assert!(pinned.index() < workers);
            for event in log.for_node(sink.name()) {
                prop_assert_eq!(event.worker(), pinned);
            }
        }
        prop_assert_eq!(runtime.tracker().active(), 0);
        runtime.shutdown();
    }
}
