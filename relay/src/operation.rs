//! The operation record carried through the pipeline.
//!
//! An [`Operation`] is a plain `Copy` value. It is moved into a buffer slot by
//! one stage and moved out by the next, so at any instant exactly one stage
//! owns it and only that stage's fields change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::{Duration, Millis, Nanos, Timestamp, now};

/// Identity of an operation.
///
/// The sentinel [`OpId::INVALID`] (`-1`) marks an empty slot or a placeholder
/// used to unblock a stage during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OpId(i32);

impl OpId {
    /// Placeholder id; never processed, forwarded, counted or recorded.
    pub const INVALID: Self = Self(-1);

    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Returns `true` unless this is the `-1` sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Table index for this id, `None` for negative ids.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl From<i32> for OpId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl From<OpId> for i32 {
    fn from(id: OpId) -> Self {
        id.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stage that last touched an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageMarker {
    /// No stage has touched the record (placeholder slot).
    #[default]
    Empty,
    Dispatcher,
    Client,
    Proxy,
    Server,
}

impl fmt::Display for StageMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Dispatcher => "dispatcher",
            Self::Client => "client",
            Self::Proxy => "proxy",
            Self::Server => "server",
        };
        f.write_str(name)
    }
}

/// The unit of work flowing through the pipeline.
///
/// Every timestamp is written at most once, by the stage that owns it:
///
/// | field             | written by                      |
/// |-------------------|---------------------------------|
/// | `dispatch_time`   | dispatcher                      |
/// | `client_time`     | client, forward path            |
/// | `proxy_time`      | proxy                           |
/// | `server_time`     | server                          |
/// | `completion_time` | client, return path (finalize)  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    id: OpId,
    owner_client: Option<usize>,
    proxy: Option<usize>,
    server: Option<usize>,
    marker: StageMarker,
    dispatch_time: Option<Timestamp>,
    client_time: Option<Timestamp>,
    proxy_time: Option<Timestamp>,
    server_time: Option<Timestamp>,
    completion_time: Option<Timestamp>,
}

impl Default for Operation {
    fn default() -> Self {
        Self::PLACEHOLDER
    }
}

impl Operation {
    /// An empty record with id `-1`.
    pub const PLACEHOLDER: Self = Self {
        id: OpId::INVALID,
        owner_client: None,
        proxy: None,
        server: None,
        marker: StageMarker::Empty,
        dispatch_time: None,
        client_time: None,
        proxy_time: None,
        server_time: None,
        completion_time: None,
    };

    /// Creates a freshly dispatched record stamped with the current time.
    #[must_use]
    pub fn dispatched(id: OpId) -> Self {
        Self::dispatched_at(id, now())
    }

    /// Creates a dispatched record with an explicit dispatch stamp.
    #[must_use]
    pub fn dispatched_at(id: OpId, at: Timestamp) -> Self {
        Self {
            id,
            marker: StageMarker::Dispatcher,
            dispatch_time: Some(at),
            ..Self::PLACEHOLDER
        }
    }

    #[must_use]
    pub const fn id(&self) -> OpId {
        self.id
    }

    /// `false` for placeholders.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    #[must_use]
    pub const fn owner_client(&self) -> Option<usize> {
        self.owner_client
    }

    #[must_use]
    pub const fn proxy(&self) -> Option<usize> {
        self.proxy
    }

    #[must_use]
    pub const fn server(&self) -> Option<usize> {
        self.server
    }

    #[must_use]
    pub const fn marker(&self) -> StageMarker {
        self.marker
    }

    #[must_use]
    pub const fn dispatch_time(&self) -> Option<Timestamp> {
        self.dispatch_time
    }

    #[must_use]
    pub const fn client_time(&self) -> Option<Timestamp> {
        self.client_time
    }

    #[must_use]
    pub const fn proxy_time(&self) -> Option<Timestamp> {
        self.proxy_time
    }

    #[must_use]
    pub const fn server_time(&self) -> Option<Timestamp> {
        self.server_time
    }

    #[must_use]
    pub const fn completion_time(&self) -> Option<Timestamp> {
        self.completion_time
    }

    /// A record is finalized once the return-path client has stamped it.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.completion_time.is_some()
    }

    /// Applies one stage's processing: records which instance handled the
    /// operation, moves the marker and stamps that stage's timestamp.
    ///
    /// Touching with [`StageMarker::Dispatcher`] or [`StageMarker::Empty`] is
    /// a no-op; dispatch stamps are set at construction.
    pub(crate) fn touch(&mut self, marker: StageMarker, instance: usize, at: Timestamp) {
        let (owner, stamp) = match marker {
            StageMarker::Client => (&mut self.owner_client, &mut self.client_time),
            StageMarker::Proxy => (&mut self.proxy, &mut self.proxy_time),
            StageMarker::Server => (&mut self.server, &mut self.server_time),
            StageMarker::Dispatcher | StageMarker::Empty => return,
        };
        *owner = Some(instance);
        set_once(stamp, at);
        self.marker = marker;
    }

    /// Stamps the completion time. The marker keeps the last forwarding stage.
    pub(crate) fn complete(&mut self, at: Timestamp) {
        set_once(&mut self.completion_time, at);
    }

    /// End-to-end latency in nanoseconds, once finalized.
    #[must_use]
    pub fn latency_nanos(&self) -> Option<Duration<Nanos>> {
        Some(Duration::between(self.dispatch_time?, self.completion_time?))
    }

    /// End-to-end latency in whole milliseconds (truncated), once finalized.
    #[must_use]
    pub fn latency(&self) -> Option<Duration<Millis>> {
        self.latency_nanos().map(Duration::truncate)
    }
}

/// Stamps are never rewound: a second write keeps the first value.
fn set_once(slot: &mut Option<Timestamp>, at: Timestamp) {
    debug_assert!(slot.is_none(), "stage timestamp written twice");
    slot.get_or_insert(at);
}
