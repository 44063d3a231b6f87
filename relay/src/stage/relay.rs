//! Single-hop stage shared by the proxy and server roles.

use super::{Received, Role, Stage, StageCounter, StageError, StageState, forward, receive};
use crate::buffer::{Inbound, Outbound};
use crate::operation::Operation;
use crate::sync::ShutdownFlag;
use crate::time::now;
use crate::trace::{debug, info, trace};

/// Reads from `upstream`, stamps the operation with this role and instance,
/// and writes it to `downstream`.
///
/// A proxy sits between the client-to-proxy and proxy-to-server buffers; a
/// server between proxy-to-server and server-to-client.
pub struct RelayStage<I, O> {
    role: Role,
    index: usize,
    upstream: I,
    downstream: O,
    counter: StageCounter,
    shutdown: ShutdownFlag,
    state: StageState,
}

impl<I, O> RelayStage<I, O>
where
    I: Inbound<Operation>,
    O: Outbound<Operation>,
{
    /// # Panics
    ///
    /// Panics if `role` is [`Role::Client`]; clients have their own stage.
    pub fn new(
        role: Role,
        index: usize,
        upstream: I,
        downstream: O,
        counter: StageCounter,
        shutdown: ShutdownFlag,
    ) -> Self {
        assert!(role != Role::Client, "clients run ClientStage");
        Self {
            role,
            index,
            upstream,
            downstream,
            counter,
            shutdown,
            state: StageState::Running,
        }
    }

    fn process(&mut self, mut op: Operation) {
        op.touch(self.role.marker(), self.index, now());
        trace!(id = %op.id(), role = %self.role, index = self.index, "forwarding");
        if forward(&self.downstream, op, &self.shutdown) {
            self.counter.increment();
        } else {
            self.state = StageState::Draining;
        }
    }
}

impl<I, O> Stage for RelayStage<I, O>
where
    I: Inbound<Operation> + Send,
    O: Outbound<Operation> + Send,
{
    fn role(&self) -> Role {
        self.role
    }

    fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> StageState {
        self.state
    }

    fn run(&mut self) -> Result<u64, StageError> {
        info!(role = %self.role, index = self.index, "stage started");
        while self.state == StageState::Running {
            match receive(&self.upstream, &self.shutdown) {
                Received::Op(op) => self.process(op),
                Received::Skipped => {}
                Received::Shutdown => self.state = StageState::Draining,
            }
            if self.shutdown.is_requested() {
                self.state = StageState::Draining;
            }
        }

        self.state = StageState::Terminated;
        let processed = self.counter.get();
        debug!(role = %self.role, index = self.index, processed, "stage terminated");
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::buffer::CircularBuffer;
    use crate::operation::{OpId, StageMarker};

    type Hop = Arc<CircularBuffer<Operation>>;

    fn relay(role: Role, shutdown: &ShutdownFlag) -> (RelayStage<Hop, Hop>, Hop, Hop, StageCounter) {
        let upstream = Arc::new(CircularBuffer::new(2));
        let downstream = Arc::new(CircularBuffer::new(2));
        let counter = StageCounter::new();
        let stage = RelayStage::new(
            role,
            1,
            Arc::clone(&upstream),
            Arc::clone(&downstream),
            counter.clone(),
            shutdown.clone(),
        );
        (stage, upstream, downstream, counter)
    }

    #[test]
    fn server_stamps_and_forwards_in_order() {
        let shutdown = ShutdownFlag::new();
        let (mut stage, upstream, downstream, counter) = relay(Role::Server, &shutdown);
        let handle = thread::spawn(move || stage.run());

        for id in 0..5 {
            upstream.push(Operation::dispatched(OpId::new(id)));
        }
        for id in 0..5 {
            let op = downstream.pop().unwrap();
            assert_eq!(op.id(), OpId::new(id));
            assert_eq!(op.marker(), StageMarker::Server);
            assert_eq!(op.server(), Some(1));
            assert!(op.server_time().is_some());
        }
        assert_eq!(counter.get(), 5);

        shutdown.request();
        upstream.wake_consumers(1);
        assert_eq!(handle.join().unwrap().unwrap(), 5);
    }

    #[test]
    fn blocked_on_full_downstream_exits_after_one_release() {
        let shutdown = ShutdownFlag::new();
        let (mut stage, upstream, downstream, counter) = relay(Role::Proxy, &shutdown);
        let handle = thread::spawn(move || {
            let processed = stage.run();
            (processed, stage.state())
        });

        // Two operations fill the downstream buffer; the third blocks.
        for id in 0..3 {
            upstream.push(Operation::dispatched(OpId::new(id)));
        }
        thread::sleep(Duration::from_millis(30));
        assert_eq!(downstream.filled_slots(), 2);
        assert_eq!(counter.get(), 2);

        shutdown.request();
        downstream.wake_producers(1);

        let (processed, state) = handle.join().unwrap();
        // The third was read, then discarded when the forward was interrupted.
        assert_eq!(processed.unwrap(), 2);
        assert_eq!(state, StageState::Terminated);
        assert_eq!(downstream.filled_slots(), 2);
        assert!(downstream.filled_slots() <= downstream.capacity());
        assert_eq!(downstream.pop().unwrap().id(), OpId::new(0));
        assert_eq!(downstream.pop().unwrap().id(), OpId::new(1));
    }

    #[test]
    fn placeholders_pass_without_counting() {
        let shutdown = ShutdownFlag::new();
        let (mut stage, upstream, downstream, counter) = relay(Role::Proxy, &shutdown);
        upstream.push(Operation::PLACEHOLDER);
        let handle = thread::spawn(move || stage.run());

        thread::sleep(Duration::from_millis(20));
        shutdown.request();
        upstream.wake_consumers(1);

        assert_eq!(handle.join().unwrap().unwrap(), 0);
        assert_eq!(counter.get(), 0);
        assert_eq!(downstream.filled_slots(), 0);
    }

    #[test]
    #[should_panic(expected = "clients run ClientStage")]
    fn client_role_is_rejected() {
        let shutdown = ShutdownFlag::new();
        let _ = relay(Role::Client, &shutdown);
    }
}
