//! Draining, timeouts, interrupts and lifecycle edge cases.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use proactor_lib::dispatcher::{Pipeline, ProactorDispatcher};
use proactor_lib::errors::{DispatchError, SinkError};
use proactor_lib::event::{Event, Payload};
use proactor_lib::shutdown::{DrainOutcome, ShutdownState};
use proactor_lib::stage::Stage;
use proactor_pool::{PoolRole, WorkerPool};

use crate::helpers::{Gate, PATIENCE, ScriptedFactory, collecting_pipeline, test_config};

fn gated_pipeline(gate: &Arc<Gate>) -> Pipeline {
    let gate = Arc::clone(gate);
    Pipeline::new().then(Stage::blocking("wait", move |event| {
        gate.pass();
        Ok(event)
    }))
}

#[test]
fn test_stop_drains_in_flight_events() {
    let config = test_config().with_consumer_count(2);
    let dispatcher = ProactorDispatcher::new("drain", config).unwrap();
    dispatcher.start().unwrap();

    let (pipeline, outcomes) = collecting_pipeline();
    let pipeline = pipeline.then(Stage::blocking("slow", |event| {
        thread::sleep(Duration::from_millis(20));
        Ok(event)
    }));
    let sink = dispatcher.create_sink("drain", pipeline).unwrap();
    for _ in 0..16 {
        sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    }

    dispatcher.stop().unwrap();
    let delivered = outcomes.drain();
    assert_eq!(delivered.len(), 16);
    assert!(delivered.iter().all(|outcome| outcome.is_success()));
    assert_eq!(sink.state(), ShutdownState::Stopped);
    assert!(!dispatcher.is_started());
}

#[test]
fn test_drain_timeout_is_reported_not_fatal() {
    let timeout = Duration::from_millis(100);
    let dispatcher = ProactorDispatcher::new("slow", test_config().with_shutdown_timeout(timeout)).unwrap();
    dispatcher.start().unwrap();

    let gate = Gate::new();
    let sink = dispatcher.create_sink("slow", gated_pipeline(&gate)).unwrap();
    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    gate.await_entered(1);

    let start = Instant::now();
    let outcome = sink.close().unwrap();
    assert!(start.elapsed() >= timeout);
    match outcome {
        DrainOutcome::TimedOut { pending, elapsed } => {
            assert_eq!(pending, 1);
            assert!(elapsed >= timeout);
        }
        DrainOutcome::Drained { .. } => panic!("drain should have timed out"),
    }

    // Closing again reports the same outcome without waiting.
    let start = Instant::now();
    assert!(sink.close().unwrap().is_timed_out());
    assert!(start.elapsed() < timeout);

    dispatcher.stop().unwrap();
    gate.open();
}

#[test]
fn test_interrupted_stop_leaves_pools_running() {
    let config = test_config().with_shutdown_timeout(Duration::from_secs(30));
    let dispatcher = Arc::new(ProactorDispatcher::new("intr", config).unwrap());
    dispatcher.start().unwrap();

    let gate = Gate::new();
    let sink = dispatcher.create_sink("intr", gated_pipeline(&gate)).unwrap();
    sink.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    gate.await_entered(1);

    let stopper = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.stop())
    };
    while sink.state() == ShutdownState::Running {
        thread::sleep(Duration::from_millis(1));
    }
    let interrupt = sink.interrupt_handle();
    interrupt.trigger();

    let err = stopper.join().unwrap().unwrap_err();
    assert!(matches!(err, DispatchError::InterruptedShutdown { ref pipeline } if pipeline == "intr"));
    assert!(dispatcher.is_started());
    assert_eq!(sink.state(), ShutdownState::Draining);
    assert!(interrupt.is_set());

    interrupt.clear();
    gate.open();
    dispatcher.stop().unwrap();
    assert!(!dispatcher.is_started());
    assert_eq!(sink.state(), ShutdownState::Stopped);
}

#[test]
fn test_stop_is_idempotent_and_safe_before_start() {
    let dispatcher = ProactorDispatcher::new("idle", test_config()).unwrap();
    dispatcher.stop().unwrap();
    assert!(!dispatcher.is_started());

    dispatcher.start().unwrap();
    dispatcher.start().unwrap();
    assert!(dispatcher.is_started());
    dispatcher.stop().unwrap();
    dispatcher.stop().unwrap();
    assert!(!dispatcher.is_started());
}

#[test]
fn test_create_sink_requires_start() {
    let dispatcher = ProactorDispatcher::new("cold", test_config()).unwrap();
    let err = dispatcher.create_sink("cold", Pipeline::new()).unwrap_err();
    assert!(matches!(err, DispatchError::NotStarted { ref dispatcher } if dispatcher == "cold"));
}

#[test]
fn test_transactional_pipeline_is_refused() {
    let dispatcher = ProactorDispatcher::new("tx", test_config()).unwrap();
    dispatcher.start().unwrap();

    let err = dispatcher.create_sink("orders", Pipeline::new().transactional(true)).unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedContext { ref pipeline } if pipeline == "orders"));
    assert!(dispatcher.all_metrics().is_empty());

    // No consumers were started, so a plain pipeline still gets the event loop.
    let sink = dispatcher.create_sink("orders", Pipeline::new()).unwrap();
    assert_eq!(sink.state(), ShutdownState::Running);
    dispatcher.stop().unwrap();
}

#[test]
fn test_second_running_sink_is_refused() {
    let dispatcher = ProactorDispatcher::new("busy", test_config()).unwrap();
    dispatcher.start().unwrap();

    let first = dispatcher.create_sink("a", Pipeline::new()).unwrap();
    let err = dispatcher.create_sink("b", Pipeline::new()).unwrap_err();
    assert!(matches!(err, DispatchError::PoolSaturated { ref pool } if pool == "busy.EVENT_LOOP"));

    first.close().unwrap();
    dispatcher.create_sink("b", Pipeline::new()).unwrap();
    dispatcher.stop().unwrap();
}

#[test]
fn test_partial_start_failure_stops_created_pools() {
    let factory = Arc::new(ScriptedFactory::failing(PoolRole::Blocking));
    let dispatcher = ProactorDispatcher::with_factory("partial", test_config(), factory.clone()).unwrap();

    let err = dispatcher.start().unwrap_err();
    assert!(matches!(err, DispatchError::PoolStart { ref pool, .. } if pool == "partial.BLOCKING"));
    assert!(!dispatcher.is_started());
    assert!(factory.pool(PoolRole::EventLoop).is_stopped());
    assert!(factory.pool(PoolRole::CpuIntensive).is_stopped());
    assert!(!factory.created(PoolRole::Blocking));

    dispatcher.stop().unwrap();
}

#[test]
fn test_submit_after_close_returns_event() {
    let dispatcher = ProactorDispatcher::new("closed", test_config()).unwrap();
    dispatcher.start().unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let pipeline = Pipeline::new().on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let sink = dispatcher.create_sink("closed", pipeline).unwrap();
    assert!(matches!(sink.close().unwrap(), DrainOutcome::Drained { .. }));

    let event = Event::new(Payload::bytes(b"late".to_vec()));
    let id = event.id();
    let err = sink.submit(event).unwrap_err();
    assert!(matches!(err, SinkError::Closed { .. }));
    assert!(!err.is_full());
    assert_eq!(err.into_event().id(), id);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.metrics("closed").unwrap().events_rejected, 1);
    dispatcher.stop().unwrap();
}

#[test]
fn test_timed_out_sink_holds_event_loop_until_consumers_exit() {
    let config = test_config().with_shutdown_timeout(Duration::from_millis(50));
    let dispatcher = ProactorDispatcher::new("reuse", config).unwrap();
    dispatcher.start().unwrap();

    let gate = Gate::new();
    let waiting = Arc::clone(&gate);
    let stuck = Pipeline::new().then(Stage::light("wait", move |event| {
        waiting.pass();
        Ok(event)
    }));
    let first = dispatcher.create_sink("a", stuck).unwrap();
    first.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    gate.await_entered(1);

    assert!(first.close().unwrap().is_timed_out());
    assert_eq!(first.state(), ShutdownState::Stopped);
    assert_eq!(first.running_consumers(), 1);

    // The straggler still owns the only event-loop thread.
    let err = dispatcher.create_sink("b", Pipeline::new()).unwrap_err();
    assert!(matches!(err, DispatchError::PoolSaturated { ref pool } if pool == "reuse.EVENT_LOOP"));

    gate.open();
    let start = Instant::now();
    while first.running_consumers() > 0 {
        assert!(start.elapsed() < PATIENCE, "timed-out consumer never exited");
        thread::sleep(Duration::from_millis(1));
    }

    let (pipeline, outcomes) = collecting_pipeline();
    let second = dispatcher.create_sink("b", pipeline.then(Stage::light("pass", Ok))).unwrap();
    second.submit(Event::new(Payload::bytes(Vec::new()))).unwrap();
    assert!(outcomes.next().is_success());
    dispatcher.stop().unwrap();
}
