//! End-to-end pipeline scenarios.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=relay=debug cargo test --features tracing --test pipeline -- --nocapture
//! ```

use std::sync::mpsc;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use relay::{
    ChannelSink, CollectingSink, CompletionEvent, CpuConfig, DispatchError, OpId, Pipeline,
    PipelineConfig, PipelineError, PipelineStats, ReportSink, Role, Route, StageMarker, Timeout,
};
use serial_test::{parallel, serial};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        relay::init_tracing();
    });
}

fn config(
    capacity: usize,
    max_ops: usize,
    clients: usize,
    proxies: usize,
    servers: usize,
) -> PipelineConfig {
    PipelineConfig {
        buffer_capacity: capacity,
        max_ops,
        clients,
        proxies,
        servers,
        route: Route::RoundRobin,
        cpu: CpuConfig::Disabled,
    }
}

/// Runs `shutdown` on another thread and fails the test if it hangs.
fn shutdown_within(pipeline: Pipeline, limit: Duration) -> Result<PipelineStats, PipelineError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pipeline.shutdown());
    });
    rx.recv_timeout(limit)
        .expect("pipeline shutdown did not complete in time")
}

/// Polls `done` every 10ms until it holds or `limit` passes.
fn eventually(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while !done() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

/// Live threads of this process named like stage threads.
#[cfg(target_os = "linux")]
fn live_stage_threads() -> usize {
    let Ok(tasks) = std::fs::read_dir("/proc/self/task") else {
        return 0;
    };
    tasks
        .filter_map(Result::ok)
        .filter(|task| {
            std::fs::read_to_string(task.path().join("comm"))
                .is_ok_and(|name| name.starts_with("relay-"))
        })
        .count()
}

/// Sink that reports when the last stage holding it lets go.
struct DropSignal(mpsc::Sender<()>);

impl ReportSink for DropSignal {
    fn completed(&self, _event: CompletionEvent) {}
}

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

#[test]
#[parallel]
fn single_chain_finalizes_ids_in_order() {
    init_test_tracing();
    let sink = Arc::new(CollectingSink::new());
    let events = Arc::clone(&sink);
    let pipeline = Pipeline::spawn(config(1, 3, 1, 1, 1), move |ev: CompletionEvent| {
        events.completed(ev);
    })
    .unwrap();

    for expected in 0..3 {
        assert_eq!(pipeline.dispatch().unwrap(), OpId::new(expected));
    }
    assert!(pipeline.wait_for(3, Timeout::Duration(Duration::from_secs(10))));
    let results = pipeline.results();
    let stats = shutdown_within(pipeline, Duration::from_secs(10)).unwrap();

    assert_eq!(stats.clients, vec![3]);
    assert_eq!(stats.proxies, vec![3]);
    assert_eq!(stats.servers, vec![3]);
    assert_eq!(stats.completed, 3);

    let records = results.snapshot();
    let ids: Vec<i32> = records.iter().map(|op| op.id().get()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    for op in &records {
        assert!(op.is_finalized());
        assert_eq!(op.marker(), StageMarker::Server);
        assert_eq!(op.owner_client(), Some(0));
        assert_eq!(op.proxy(), Some(0));
        assert_eq!(op.server(), Some(0));
        assert!(op.completion_time().unwrap() >= op.dispatch_time().unwrap());
    }
    for pair in records.windows(2) {
        assert!(pair[0].dispatch_time() <= pair[1].dispatch_time());
        assert!(pair[0].completion_time() <= pair[1].completion_time());
    }

    let reported: Vec<OpId> = sink.events().iter().map(|ev| ev.id).collect();
    assert_eq!(reported, vec![OpId::new(0), OpId::new(1), OpId::new(2)]);
}

#[test]
#[parallel]
fn fan_out_pipeline_completes_every_operation() {
    init_test_tracing();
    const OPS: usize = 300;
    let mut cfg = config(2, OPS, 3, 2, 4);
    cfg.route = Route::Random;
    let pipeline = Pipeline::spawn(cfg, CollectingSink::new()).unwrap();

    let dispatcher = pipeline.dispatcher();
    let feeder = thread::spawn(move || {
        (0..OPS).map(|_| dispatcher.dispatch()).collect::<Result<Vec<_>, _>>()
    });
    let ids = feeder.join().unwrap().unwrap();
    assert_eq!(ids.len(), OPS);
    assert_eq!(
        pipeline.dispatch().unwrap_err().to_string(),
        DispatchError::IdSpaceExhausted { max_ops: OPS }.to_string()
    );

    assert!(pipeline.wait_for(OPS, Timeout::Duration(Duration::from_secs(20))));
    let results = pipeline.results();
    let stats = shutdown_within(pipeline, Duration::from_secs(10)).unwrap();

    assert_eq!(stats.completed, OPS);
    assert_eq!(stats.total(Role::Client), OPS as u64);
    assert_eq!(stats.total(Role::Proxy), OPS as u64);
    assert_eq!(stats.total(Role::Server), OPS as u64);

    for op in results.snapshot() {
        assert!(op.owner_client().unwrap() < 3);
        assert!(op.proxy().unwrap() < 2);
        assert!(op.server().unwrap() < 4);
        assert!(op.latency().is_some());
    }
}

#[test]
#[parallel]
fn idle_pipeline_stops_promptly() {
    init_test_tracing();
    // Every stage is parked on an empty buffer; one release each must free them.
    let pipeline = Pipeline::spawn(config(1, 8, 2, 2, 2), CollectingSink::new()).unwrap();
    thread::sleep(Duration::from_millis(20));
    let stats = shutdown_within(pipeline, Duration::from_secs(5)).unwrap();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.total(Role::Client), 0);
}

#[test]
#[parallel]
fn shutdown_under_load_records_only_real_operations() {
    init_test_tracing();
    const OPS: usize = 5_000;
    let pipeline = Pipeline::spawn(config(2, OPS, 2, 1, 1), CollectingSink::new()).unwrap();
    let dispatcher = pipeline.dispatcher();
    let results = pipeline.results();

    let feeder = thread::spawn(move || {
        let mut sent = 0usize;
        loop {
            match dispatcher.dispatch() {
                Ok(_) => sent += 1,
                Err(DispatchError::ShutDown | DispatchError::IdSpaceExhausted { .. }) => break sent,
            }
        }
    });

    assert!(pipeline.wait_for(10, Timeout::Duration(Duration::from_secs(10))));
    let stats = shutdown_within(pipeline, Duration::from_secs(10)).unwrap();
    let sent = feeder.join().unwrap();

    let records = results.snapshot();
    assert_eq!(records.len(), stats.completed);
    assert!(stats.completed <= sent);
    assert!(stats.total(Role::Client) >= stats.completed as u64);
    for op in records {
        assert!(op.id().is_valid());
        assert!(op.is_finalized());
        assert!(op.completion_time().unwrap() >= op.dispatch_time().unwrap());
    }
}

#[test]
#[parallel]
fn channel_sink_reports_each_completion() {
    init_test_tracing();
    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::spawn(config(4, 16, 2, 1, 1), ChannelSink::new(tx)).unwrap();
    for _ in 0..16 {
        pipeline.dispatch().unwrap();
    }

    let mut seen: Vec<i32> = (0..16)
        .map(|_| rx.recv_timeout(Duration::from_secs(10)).unwrap().id.get())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..16).collect::<Vec<_>>());

    let stats = shutdown_within(pipeline, Duration::from_secs(10)).unwrap();
    assert_eq!(stats.completed, 16);
}

#[test]
#[serial]
fn dropping_a_pipeline_stops_every_stage_thread() {
    init_test_tracing();
    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::spawn(config(1, 4, 2, 2, 2), DropSignal(tx)).unwrap();
    let flag = pipeline.shutdown_flag();
    let results = pipeline.results();
    pipeline.dispatch().unwrap();

    #[cfg(target_os = "linux")]
    assert!(eventually(Duration::from_secs(5), || live_stage_threads() == 6));

    drop(pipeline);
    assert!(flag.is_requested());

    // Only client stages hold the sink; it drops with the last of them.
    rx.recv_timeout(Duration::from_secs(5))
        .expect("client stages still running after drop");
    assert!(eventually(Duration::from_secs(5), || Arc::strong_count(&results) == 1));

    #[cfg(target_os = "linux")]
    assert!(
        eventually(Duration::from_secs(5), || live_stage_threads() == 0),
        "stage threads still alive after drop"
    );
}

#[cfg(unix)]
mod interrupts {
    use super::*;
    use relay::signals;

    #[test]
    #[serial]
    fn interrupt_reaches_the_controller_not_the_stages() {
        init_test_tracing();
        signals::install_interrupt_handler().unwrap();
        signals::clear_interrupt();

        let pipeline = Pipeline::spawn(config(2, 8, 1, 1, 1), CollectingSink::new()).unwrap();
        // SAFETY: a handler for SIGINT is installed above.
        assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
        assert!(signals::interrupt_requested());

        // The stages keep running until the controller acts on it.
        pipeline.dispatch().unwrap();
        assert!(pipeline.wait_for(1, Timeout::Duration(Duration::from_secs(10))));
        let stats = shutdown_within(pipeline, Duration::from_secs(10)).unwrap();
        assert_eq!(stats.completed, 1);
        signals::clear_interrupt();
    }
}
