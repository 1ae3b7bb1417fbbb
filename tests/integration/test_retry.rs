//! Saturated pools are retried; stage errors and stopped pools end the event.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::bail;
use proactor_lib::dispatcher::ProactorDispatcher;
use proactor_lib::errors::DispatchError;
use proactor_lib::event::{Event, Payload};
use proactor_lib::stage::Stage;
use proactor_pool::{PoolRole, WorkerPool};

use crate::helpers::{PATIENCE, ScriptedFactory, collecting_pipeline, test_config};

#[test]
fn test_saturated_pool_is_retried_until_accepted() {
    let interval = Duration::from_millis(5);
    let config = test_config().with_retry_interval(interval);
    let factory = Arc::new(ScriptedFactory::rejecting(PoolRole::Blocking, 3));
    let dispatcher = ProactorDispatcher::with_factory("retry", config, factory.clone()).unwrap();
    dispatcher.start().unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::blocking("write", move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(event)
    }));
    let sink = dispatcher.create_sink("retry", pipeline).unwrap();

    sink.submit(Event::new(Payload::bytes(b"x".to_vec()))).unwrap();
    let event = outcomes.next().result.unwrap();
    assert_eq!(event.execution_context(), Some("retry.BLOCKING"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let attempts = factory.pool(PoolRole::Blocking).attempts();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= interval, "retried after {:?}", pair[1] - pair[0]);
    }

    let metrics = dispatcher.metrics("retry").unwrap();
    assert_eq!(metrics.saturation_retries, 3);
    assert_eq!(metrics.blocking_offloads, 1);
    assert_eq!(metrics.events_completed, 1);
    dispatcher.stop().unwrap();
}

#[test]
fn test_stage_error_is_passed_through() {
    let dispatcher = ProactorDispatcher::new("fail", test_config()).unwrap();
    dispatcher.start().unwrap();

    let after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after);
    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline
        .then(Stage::cpu_intensive("validate", |_| bail!("checksum mismatch")))
        .then(Stage::light("never", move |event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(event)
        }));
    let sink = dispatcher.create_sink("fail", pipeline).unwrap();

    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    let err = outcomes.next().result.unwrap_err();
    assert!(err.is_stage_failure());
    assert_eq!(err.to_string(), "checksum mismatch");
    assert_eq!(after.load(Ordering::SeqCst), 0);

    let metrics = dispatcher.metrics("fail").unwrap();
    assert_eq!(metrics.events_failed, 1);
    assert_eq!(metrics.events_completed, 0);
    dispatcher.stop().unwrap();
}

#[test]
fn test_panicking_stage_fails_only_its_event() {
    let dispatcher = ProactorDispatcher::new("panic", test_config()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::blocking("explode", |event: Event| {
        assert!(!event.payload().data().is_empty(), "empty payload");
        Ok(event)
    }));
    let sink = dispatcher.create_sink("panic", pipeline).unwrap();

    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    let err = outcomes.next().result.unwrap_err();
    assert!(err.is_stage_failure());
    let message = err.to_string();
    assert!(message.starts_with("Stage 'explode' panicked"), "{message}");
    assert!(message.contains("empty payload"), "{message}");

    sink.submit(Event::new(Payload::bytes(b"ok".to_vec()))).unwrap();
    assert!(outcomes.next().is_success());
    dispatcher.stop().unwrap();
}

#[test]
fn test_stopped_pool_cancels_event() {
    let factory = Arc::new(ScriptedFactory::default());
    let dispatcher = ProactorDispatcher::with_factory("stopped", test_config(), factory.clone()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let sink = dispatcher.create_sink("stopped", pipeline.then(Stage::blocking("write", Ok))).unwrap();
    factory.pool(PoolRole::Blocking).stop();

    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    let err = outcomes.next().result.unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled { ref pool } if pool == "stopped.BLOCKING"));
    assert_eq!(dispatcher.metrics("stopped").unwrap().events_cancelled, 1);
    dispatcher.stop().unwrap();
}

#[test]
fn test_retries_end_when_pools_stop() {
    let config = test_config().with_shutdown_timeout(Duration::from_millis(100));
    let factory = Arc::new(ScriptedFactory::rejecting(PoolRole::CpuIntensive, usize::MAX));
    let dispatcher = ProactorDispatcher::with_factory("forever", config, factory.clone()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let sink = dispatcher.create_sink("forever", pipeline.then(Stage::cpu_intensive("hash", Ok))).unwrap();
    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();

    let start = Instant::now();
    while factory.pool(PoolRole::CpuIntensive).attempt_count() < 3 {
        assert!(start.elapsed() < PATIENCE, "no retries observed");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(outcomes.drain().is_empty());

    // The drain times out while the event is still retrying; stopping the pools
    // then turns the next attempt into a cancellation.
    dispatcher.stop().unwrap();
    let err = outcomes.next().result.unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled { .. }));
}
