//! Pipeline controller: builds the buffers, spawns the stage threads and
//! owns the shutdown sequence.
//!
//! # Layout
//!
//! ```text
//!              random-access        circular         circular          circular
//! Dispatcher ──[dispatched]──> Client ──[to_proxy]──> Proxy ──[to_server]──> Server
//!                                ^                                             │
//!                                └──────────────────[to_client]────────────────┘
//! ```
//!
//! With `clients <= capacity` client `c` owns the dispatcher slots
//! `i % clients == c`, so every slot is in use; with more clients than
//! slots, client `c` shares slot `c % capacity`. The three circular buffers
//! are shared by every instance of the roles on either side.
//!
//! # Shutdown
//!
//! [`Pipeline::shutdown`] sets the flag, then releases every semaphore once
//! per instance that can be blocked on it, so each blocked stage wakes,
//! observes the flag and returns. Only then are the threads joined.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::buffer::{CircularBuffer, RandomAccessBuffer};
use crate::config::{ConfigError, PipelineConfig};
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::operation::{OpId, Operation};
use crate::report::ReportSink;
use crate::results::ResultsTable;
use crate::signals;
use crate::stage::{ClientStage, RelayStage, Role, Stage, StageCounter, StageError};
use crate::sync::{ShutdownFlag, Timeout};
use crate::topology::pin_to_core;
use crate::trace::{debug, error, info, warn};

/// How often [`Pipeline::wait_for`] re-checks the shutdown flag.
const WAIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A stage thread could not be spawned.
    #[error("failed to spawn stage thread: {0}")]
    Spawn(io::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A stage aborted.
    #[error("{role} {index} failed: {source}")]
    Stage {
        role: Role,
        index: usize,
        #[source]
        source: StageError,
    },
}

/// Per-instance processed counts and the number of finalized operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub clients: Vec<u64>,
    pub proxies: Vec<u64>,
    pub servers: Vec<u64>,
    pub completed: usize,
}

impl PipelineStats {
    #[must_use]
    pub fn instances(&self, role: Role) -> &[u64] {
        match role {
            Role::Client => &self.clients,
            Role::Proxy => &self.proxies,
            Role::Server => &self.servers,
        }
    }

    /// Operations processed by every instance of `role`.
    #[must_use]
    pub fn total(&self, role: Role) -> u64 {
        self.instances(role).iter().sum()
    }
}

struct Worker {
    role: Role,
    index: usize,
    counter: StageCounter,
    handle: Option<JoinHandle<Result<u64, StageError>>>,
}

struct Hops {
    dispatched: Arc<RandomAccessBuffer<Operation>>,
    to_proxy: Arc<CircularBuffer<Operation>>,
    to_server: Arc<CircularBuffer<Operation>>,
    to_client: Arc<CircularBuffer<Operation>>,
}

/// Handle to a running pipeline.
///
/// Dropping the handle sets the shutdown flag and wakes every stage but does
/// not wait for the threads to exit. Use [`Pipeline::shutdown`] to join them
/// and collect the final counters.
pub struct Pipeline {
    config: PipelineConfig,
    shutdown: ShutdownFlag,
    hops: Hops,
    dispatcher: Arc<Dispatcher>,
    results: Arc<ResultsTable>,
    workers: Vec<Worker>,
}

impl Pipeline {
    /// Validates `config`, creates every shared region and spawns one named
    /// thread per stage instance (`relay-client-0`, `relay-proxy-0`, ...).
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an invalid configuration and
    /// [`PipelineError::Spawn`] if a thread cannot be started, in which case
    /// the threads already running are stopped and joined.
    pub fn spawn<S>(config: PipelineConfig, sink: S) -> Result<Self, PipelineError>
    where
        S: ReportSink + 'static,
    {
        config.validate()?;
        info!(
            capacity = config.buffer_capacity,
            max_ops = config.max_ops,
            clients = config.clients,
            proxies = config.proxies,
            servers = config.servers,
            route = ?config.route,
            "pipeline starting"
        );

        let shutdown = ShutdownFlag::new();
        let capacity = config.buffer_capacity;
        let hops = Hops {
            dispatched: Arc::new(RandomAccessBuffer::new(capacity)),
            to_proxy: Arc::new(CircularBuffer::new(capacity)),
            to_server: Arc::new(CircularBuffer::new(capacity)),
            to_client: Arc::new(CircularBuffer::new(capacity)),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&hops.dispatched),
            config.clients,
            config.max_ops,
            config.route,
            shutdown.clone(),
        ));
        let results = Arc::new(ResultsTable::new(config.max_ops));

        let mut pipeline = Self {
            config,
            shutdown,
            hops,
            dispatcher,
            results,
            workers: Vec::new(),
        };
        if let Err(err) = pipeline.spawn_stages(Arc::new(sink)) {
            error!(error = %err, "stage spawn failed, stopping pipeline");
            // The spawn error is the one worth reporting.
            let _ = pipeline.stop();
            return Err(err);
        }

        info!(threads = pipeline.workers.len(), "pipeline started");
        Ok(pipeline)
    }

    fn spawn_stages(&mut self, sink: Arc<dyn ReportSink>) -> Result<(), PipelineError> {
        let placement = self.config.cpu.resolve(self.config.stage_threads());
        debug!(strategy = %placement.strategy, pinned = placement.pinned(), "stage placement");
        let mut cores = (0..).map(|thread| placement.core_for(thread));

        for index in 0..self.config.clients {
            let counter = StageCounter::new();
            let dispatched = self.hops.dispatched.group(index, self.config.clients);
            debug!(client = index, slots = ?dispatched.slots().collect::<Vec<_>>(), "dispatcher slots");
            let stage = ClientStage::new(
                index,
                dispatched,
                Arc::clone(&self.hops.to_proxy),
                Arc::clone(&self.hops.to_client),
                Arc::clone(&self.results),
                Arc::clone(&sink),
                counter.clone(),
                self.shutdown.clone(),
            );
            self.launch(stage, counter, cores.next().flatten())?;
        }
        let relays = [
            (Role::Proxy, self.config.proxies, &self.hops.to_proxy, &self.hops.to_server),
            (Role::Server, self.config.servers, &self.hops.to_server, &self.hops.to_client),
        ]
        .map(|(role, instances, upstream, downstream)| {
            (role, instances, Arc::clone(upstream), Arc::clone(downstream))
        });
        for (role, instances, upstream, downstream) in relays {
            for index in 0..instances {
                let counter = StageCounter::new();
                let stage = RelayStage::new(
                    role,
                    index,
                    Arc::clone(&upstream),
                    Arc::clone(&downstream),
                    counter.clone(),
                    self.shutdown.clone(),
                );
                self.launch(stage, counter, cores.next().flatten())?;
            }
        }
        Ok(())
    }

    fn launch<S>(
        &mut self,
        stage: S,
        counter: StageCounter,
        core: Option<usize>,
    ) -> Result<(), PipelineError>
    where
        S: Stage + 'static,
    {
        let role = stage.role();
        let index = stage.index();
        let handle = spawn_stage(stage, core).map_err(|err| {
            error!(%role, index, error = %err, "failed to spawn stage thread");
            PipelineError::Spawn(err)
        })?;
        self.workers.push(Worker {
            role,
            index,
            counter,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Dispatches one new operation.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub fn dispatch(&self) -> Result<OpId, PipelineError> {
        Ok(self.dispatcher.dispatch()?)
    }

    /// Shared dispatcher, for injecting work from other threads.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn results(&self) -> Arc<ResultsTable> {
        Arc::clone(&self.results)
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The flag every stage polls, for wiring external signal handling.
    #[must_use]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Live counters; may change while the pipeline runs.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let mut stats = PipelineStats {
            completed: self.results.len(),
            ..PipelineStats::default()
        };
        for worker in &self.workers {
            let count = worker.counter.get();
            match worker.role {
                Role::Client => stats.clients.push(count),
                Role::Proxy => stats.proxies.push(count),
                Role::Server => stats.servers.push(count),
            }
        }
        stats
    }

    /// Blocks until `count` operations are finalized.
    ///
    /// Returns `false` on timeout or if shutdown is requested first.
    pub fn wait_for(&self, count: usize, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        loop {
            let slice = match deadline {
                None => WAIT_POLL,
                Some(deadline) => {
                    let now = minstant::Instant::now();
                    if now >= deadline {
                        return self.results.len() >= count;
                    }
                    deadline.duration_since(now).min(WAIT_POLL)
                }
            };
            if self.results.wait_for(count, Timeout::Duration(slice)) {
                return true;
            }
            if self.shutdown.is_requested() {
                return false;
            }
        }
    }

    /// Stops every stage, joins the threads and returns the final counters.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure (abort or panic). Every thread is
    /// joined regardless.
    pub fn shutdown(mut self) -> Result<PipelineStats, PipelineError> {
        info!("pipeline shutdown initiated");
        self.stop()?;
        let stats = self.stats();
        info!(
            completed = stats.completed,
            clients = stats.total(Role::Client),
            proxies = stats.total(Role::Proxy),
            servers = stats.total(Role::Server),
            "pipeline shutdown complete"
        );
        Ok(stats)
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        if self.shutdown.request() {
            debug!("shutdown flag set");
        }
        self.wake_all();

        let mut failure = None;
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            debug!(role = %worker.role, index = worker.index, "joining stage");
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(payload) => Err(StageError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Err(source) = outcome {
                warn!(role = %worker.role, index = worker.index, error = %source, "stage failed");
                failure.get_or_insert(PipelineError::Stage {
                    role: worker.role,
                    index: worker.index,
                    source,
                });
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Compensating releases: one per instance that may be blocked on each
    /// semaphore. Stages only wait once after the flag is set, so this is
    /// enough for every one of them to wake and return.
    fn wake_all(&self) {
        let cfg = &self.config;
        // Clients mapped onto one dispatcher slot.
        self.hops
            .dispatched
            .wake_consumers(cfg.clients.div_ceil(cfg.buffer_capacity));
        self.dispatcher.wake_blocked();

        self.hops.to_proxy.wake_producers(cfg.clients);
        self.hops.to_proxy.wake_consumers(cfg.proxies);
        self.hops.to_server.wake_producers(cfg.proxies);
        self.hops.to_server.wake_consumers(cfg.servers);
        self.hops.to_client.wake_producers(cfg.servers);
        self.hops.to_client.wake_consumers(cfg.clients);

        self.results.notify_waiters();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.workers.iter().any(|w| w.handle.is_some()) {
            self.shutdown.request();
            self.wake_all();
        }
    }
}

fn spawn_stage<S>(
    mut stage: S,
    core: Option<usize>,
) -> io::Result<JoinHandle<Result<u64, StageError>>>
where
    S: Stage + 'static,
{
    let name = format!("relay-{}-{}", stage.role(), stage.index());
    thread::Builder::new().name(name).spawn(move || {
        if let Err(_err) = signals::ignore_interrupts() {
            warn!(error = %_err, "could not mask SIGINT on stage thread");
        }
        if let Some(core) = core
            && !pin_to_core(core)
        {
            warn!(core, "failed to pin stage thread");
        }

        let outcome = stage.run();
        match &outcome {
            Ok(_processed) => {
                debug!(processed = *_processed, "stage exiting");
            }
            Err(_err) => {
                error!(error = %_err, "stage aborted");
            }
        }
        outcome
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
