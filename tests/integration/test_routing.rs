//! Stage routing: which pool each stage runs on, and in what order.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use proactor_lib::classifier::DispatchMode;
use proactor_lib::dispatcher::ProactorDispatcher;
use proactor_lib::event::{Event, Payload};
use proactor_lib::stage::Stage;
use proactor_pool::PoolRole;

use crate::helpers::{ScriptedFactory, collecting_pipeline, test_config};

fn thread_name() -> String {
    thread::current().name().unwrap_or_default().to_string()
}

fn append(byte: u8) -> impl Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static {
    move |event: Event| {
        let mut data = event.payload().data().to_vec();
        data.push(byte);
        Ok(event.with_payload(Payload::bytes(data)))
    }
}

#[test]
fn test_cpu_intensive_stage_runs_on_cpu_pool() {
    let dispatcher = ProactorDispatcher::new("route", test_config()).unwrap();
    dispatcher.start().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::cpu_intensive("hash", move |event| {
        recorder.lock().push(thread_name());
        Ok(event)
    }));
    let sink = dispatcher.create_sink("route", pipeline).unwrap();

    for _ in 0..20 {
        sink.submit(Event::new(Payload::bytes(b"x".to_vec()))).unwrap();
    }
    for outcome in outcomes.take(20) {
        let event = outcome.result.unwrap();
        assert_eq!(event.execution_context(), Some("route.CPU_INTENSIVE"));
    }
    for name in seen.lock().iter() {
        assert!(name.starts_with("route.CPU_INTENSIVE."), "stage ran on {name}");
    }

    let metrics = dispatcher.metrics("route").unwrap();
    assert_eq!(metrics.cpu_intensive_offloads, 20);
    assert_eq!(metrics.inline_executions, 0);
    dispatcher.stop().unwrap();
}

#[test]
fn test_io_rw_stage_offloads_only_large_streams() {
    let config = test_config()
        .with_buffer_size(10)
        .with_consumer_count(1)
        .with_max_concurrency(4)
        .with_streaming_threshold(16_384);
    let factory = Arc::new(ScriptedFactory::default());
    let dispatcher = ProactorDispatcher::with_factory("io", config, factory.clone()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::io_rw("copy", Ok));
    let sink = dispatcher.create_sink("io", pipeline).unwrap();
    let blocking = factory.pool(PoolRole::Blocking);

    sink.submit(Event::new(Payload::stream(vec![0; 32_768], Some(32_768)))).unwrap();
    let large = outcomes.next().result.unwrap();
    assert_eq!(large.execution_context(), Some("io.BLOCKING"));
    assert_eq!(blocking.attempt_count(), 1);

    sink.submit(Event::new(Payload::bytes(vec![0; 100]))).unwrap();
    let small = outcomes.next().result.unwrap();
    assert_eq!(small.execution_context(), Some("io.EVENT_LOOP"));
    assert_eq!(blocking.attempt_count(), 1);
    assert_eq!(factory.pool(PoolRole::CpuIntensive).attempt_count(), 0);

    dispatcher.stop().unwrap();
}

#[test]
fn test_stages_run_in_order_across_pools() {
    let dispatcher = ProactorDispatcher::new("order", test_config().with_consumer_count(2)).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline
        .then(Stage::light("a", append(b'a')))
        .then(Stage::cpu_intensive("b", append(b'b')))
        .then(Stage::blocking("c", append(b'c')))
        .then(Stage::light("d", append(b'd')));
    let sink = dispatcher.create_sink("order", pipeline).unwrap();

    for _ in 0..50 {
        sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    }
    for outcome in outcomes.take(50) {
        let event = outcome.result.unwrap();
        assert_eq!(event.payload().data(), b"abcd");
        // The last stage was light, so the event finished back on the loop.
        assert_eq!(event.execution_context(), Some("order.EVENT_LOOP"));
    }
    dispatcher.stop().unwrap();
}

#[test]
fn test_event_loop_mode_never_offloads() {
    let config = test_config().with_mode(DispatchMode::EventLoop);
    let factory = Arc::new(ScriptedFactory::default());
    let dispatcher = ProactorDispatcher::with_factory("inline", config, factory.clone()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline
        .then(Stage::cpu_intensive("cpu", Ok))
        .then(Stage::blocking("block", Ok))
        .then(Stage::io_rw("io", Ok));
    let sink = dispatcher.create_sink("inline", pipeline).unwrap();

    sink.submit(Event::new(Payload::stream(vec![0; 64], None))).unwrap();
    let event = outcomes.next().result.unwrap();
    assert_eq!(event.execution_context(), Some("inline.EVENT_LOOP"));
    assert_eq!(factory.pool(PoolRole::CpuIntensive).attempt_count(), 0);
    assert_eq!(factory.pool(PoolRole::Blocking).attempt_count(), 0);

    let metrics = dispatcher.metrics("inline").unwrap();
    assert_eq!(metrics.inline_executions, 3);
    assert_eq!(metrics.total_offloads(), 0);
    dispatcher.stop().unwrap();
}

#[test]
fn test_thread_instrumentation_records_handoffs() {
    let config = test_config().with_thread_instrumentation(true);
    let dispatcher = ProactorDispatcher::new("diag", config).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline
        .then(Stage::light("parse", Ok))
        .then(Stage::cpu_intensive("hash", Ok))
        .then(Stage::blocking("store", Ok));
    let sink = dispatcher.create_sink("diag", pipeline).unwrap();

    sink.submit(Event::new(Payload::bytes(b"x".to_vec()))).unwrap();
    let id = outcomes.next().id;

    let handoffs = dispatcher.diagnostics().handoffs(id);
    assert_eq!(handoffs.len(), 2);
    assert_eq!(handoffs[0].pool, "diag.CPU_INTENSIVE");
    assert_eq!(handoffs[0].stage, "hash");
    assert!(handoffs[0].submitted_from.starts_with("diag.EVENT_LOOP."));
    assert!(handoffs[0].executed_on.starts_with("diag.CPU_INTENSIVE."));
    assert_eq!(handoffs[1].pool, "diag.BLOCKING");
    assert!(handoffs[1].executed_on.starts_with("diag.BLOCKING."));
    dispatcher.stop().unwrap();
}

#[test]
fn test_instrumentation_disabled_records_nothing() {
    let dispatcher = ProactorDispatcher::new("quiet", test_config()).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let sink = dispatcher
        .create_sink("quiet", pipeline.then(Stage::cpu_intensive("hash", Ok)))
        .unwrap();
    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    let id = outcomes.next().id;

    assert!(dispatcher.diagnostics().handoffs(id).is_empty());
    assert!(dispatcher.diagnostics().is_empty());
    dispatcher.stop().unwrap();
}
