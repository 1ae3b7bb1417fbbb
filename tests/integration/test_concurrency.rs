//! Offloaded work never exceeds the per-pool concurrency bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use proactor_lib::config::DispatchConfig;
use proactor_lib::dispatcher::ProactorDispatcher;
use proactor_lib::event::{Event, Payload};
use proactor_lib::stage::Stage;
use proactor_pool::PoolRole;
use proptest::prelude::*;

use crate::helpers::collecting_pipeline;

/// Tracks how many stage invocations overlap.
#[derive(Default)]
struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Push `events` through a slow CPU-intensive stage; returns the observed peak overlap.
fn run_cpu_load(dispatcher: &ProactorDispatcher, events: usize) -> usize {
    let overlap = Arc::new(Overlap::default());
    let tracker = Arc::clone(&overlap);
    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::cpu_intensive("crunch", move |event| {
        tracker.enter();
        thread::sleep(Duration::from_millis(2));
        tracker.exit();
        Ok(event)
    }));
    let sink = dispatcher.create_sink("load", pipeline).unwrap();
    for _ in 0..events {
        sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    }
    assert!(outcomes.take(events).iter().all(|outcome| outcome.is_success()));
    sink.close().unwrap();
    overlap.peak()
}

fn wide_pools(config: DispatchConfig) -> DispatchConfig {
    config.with_pool_threads(8, 8).with_pool_queue_capacity(32)
}

#[test]
fn test_offloads_capped_at_bound() {
    let config = wide_pools(DispatchConfig::default())
        .with_max_concurrency(4)
        .with_parallelism(Some(1))
        .with_consumer_count(1);
    assert_eq!(config.offload_concurrency(), 4);
    let dispatcher = ProactorDispatcher::new("cap", config).unwrap();
    dispatcher.start().unwrap();

    let peak = run_cpu_load(&dispatcher, 64);
    assert!((1..=4).contains(&peak), "peak overlap {peak}");
    assert!(dispatcher.limiter(PoolRole::CpuIntensive).peak() <= 4);
    assert_eq!(dispatcher.limiter(PoolRole::CpuIntensive).in_flight(), 0);

    let metrics = dispatcher.metrics("load").unwrap();
    assert!(metrics.peak_cpu_intensive_in_flight <= 4);
    assert_eq!(metrics.cpu_intensive_offloads, 64);
    dispatcher.stop().unwrap();
}

#[test]
fn test_bound_floors_at_one() {
    let config = wide_pools(DispatchConfig::default())
        .with_max_concurrency(4)
        .with_parallelism(Some(8))
        .with_consumer_count(1);
    assert_eq!(config.offload_concurrency(), 1);
    let dispatcher = ProactorDispatcher::new("floor", config).unwrap();
    dispatcher.start().unwrap();

    assert_eq!(run_cpu_load(&dispatcher, 16), 1);
    dispatcher.stop().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_bound_holds_for_any_configuration(
        max_concurrency in 1usize..=8,
        parallelism in 1usize..=3,
        consumers in 1usize..=3,
    ) {
        let config = wide_pools(DispatchConfig::default())
            .with_max_concurrency(max_concurrency)
            .with_parallelism(Some(parallelism))
            .with_consumer_count(consumers);
        let bound = config.offload_concurrency();
        prop_assert_eq!(bound, (max_concurrency / (parallelism * consumers)).max(1));

        let dispatcher = ProactorDispatcher::new("prop", config).unwrap();
        dispatcher.start().unwrap();
        let peak = run_cpu_load(&dispatcher, 24);
        dispatcher.stop().unwrap();

        prop_assert!(peak <= bound, "peak {} above bound {}", peak, bound);
        prop_assert!(dispatcher.limiter(PoolRole::CpuIntensive).peak() <= bound);
    }
}
