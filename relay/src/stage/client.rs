//! Client stage: injects dispatched operations into the proxy tier and
//! finalizes the answers coming back from the servers.

use std::sync::Arc;

use super::{Received, Role, Stage, StageCounter, StageError, StageState, forward, receive};
use crate::buffer::{Inbound, Outbound};
use crate::operation::Operation;
use crate::report::{CompletionEvent, ReportSink};
use crate::results::ResultsTable;
use crate::sync::ShutdownFlag;
use crate::time::now;
use crate::trace::{debug, error, info, trace};

/// One client instance.
///
/// Each iteration moves at most one operation forward (dispatcher to proxy)
/// and finalizes at most one operation from the return path (server to
/// client). The return path is shared by every client, so the operation a
/// client finalizes need not be the one it forwarded.
pub struct ClientStage<D, P, R> {
    index: usize,
    dispatched: D,
    to_proxy: P,
    returned: R,
    results: Arc<ResultsTable>,
    sink: Arc<dyn ReportSink>,
    counter: StageCounter,
    shutdown: ShutdownFlag,
    state: StageState,
}

impl<D, P, R> ClientStage<D, P, R>
where
    D: Inbound<Operation>,
    P: Outbound<Operation>,
    R: Inbound<Operation>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        dispatched: D,
        to_proxy: P,
        returned: R,
        results: Arc<ResultsTable>,
        sink: Arc<dyn ReportSink>,
        counter: StageCounter,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            index,
            dispatched,
            to_proxy,
            returned,
            results,
            sink,
            counter,
            shutdown,
            state: StageState::Running,
        }
    }

    /// Forward half: client processing then the write to the proxies.
    fn process_request(&mut self, mut op: Operation) {
        op.touch(Role::Client.marker(), self.index, now());
        trace!(id = %op.id(), client = self.index, "forwarding to proxy");
        if forward(&self.to_proxy, op, &self.shutdown) {
            self.counter.increment();
        } else {
            self.state = StageState::Draining;
        }
    }

    /// Return half: stamp completion, store, report.
    fn finalize(&self, mut op: Operation) -> Result<(), StageError> {
        op.complete(now());
        if let Err(err) = self.results.record(op) {
            error!(id = %op.id(), client = self.index, error = %err, "cannot finalize operation");
            return Err(err.into());
        }
        if let Some(event) = CompletionEvent::from_operation(&op, self.index) {
            self.sink.completed(event);
        }
        Ok(())
    }

    fn terminate(&mut self) -> u64 {
        self.state = StageState::Terminated;
        let processed = self.counter.get();
        debug!(client = self.index, processed, "client terminated");
        processed
    }
}

impl<D, P, R> Stage for ClientStage<D, P, R>
where
    D: Inbound<Operation> + Send,
    P: Outbound<Operation> + Send,
    R: Inbound<Operation> + Send,
{
    fn role(&self) -> Role {
        Role::Client
    }

    fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> StageState {
        self.state
    }

    fn run(&mut self) -> Result<u64, StageError> {
        info!(client = self.index, "client started");
        loop {
            if self.shutdown.is_requested() {
                return Ok(self.terminate());
            }

            match receive(&self.dispatched, &self.shutdown) {
                Received::Op(op) => self.process_request(op),
                Received::Skipped => {}
                Received::Shutdown => self.state = StageState::Draining,
            }

            // An answer read before shutdown is still finalized.
            match receive(&self.returned, &self.shutdown) {
                Received::Op(op) => self.finalize(op)?,
                Received::Skipped => {}
                Received::Shutdown => self.state = StageState::Draining,
            }

            if self.shutdown.is_requested() {
                return Ok(self.terminate());
            }
        }
    }
}
