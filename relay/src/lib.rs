//! Multi-stage request pipeline.
//!
//! Operations flow dispatcher → client → proxy → server → client. Each hop is
//! a bounded buffer guarded by a free/filled semaphore handshake; every stage
//! instance runs on its own thread, stamps the operation and moves it on.
//! Clients finalize returning operations into a mutex-protected
//! [`ResultsTable`] and report their latency to a [`ReportSink`].
//!
//! ```no_run
//! use relay::{CollectingSink, Pipeline, PipelineConfig, Timeout};
//!
//! let pipeline = Pipeline::spawn(PipelineConfig::default(), CollectingSink::new())?;
//! for _ in 0..3 {
//!     pipeline.dispatch()?;
//! }
//! pipeline.wait_for(3, Timeout::Infinite);
//! let stats = pipeline.shutdown()?;
//! assert_eq!(stats.completed, 3);
//! # Ok::<(), relay::PipelineError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod operation;
pub mod pipeline;
pub mod report;
pub mod results;
pub mod signals;
pub mod stage;
pub mod sync;
pub mod time;
pub mod topology;
pub mod trace;

pub use config::{ConfigError, PipelineConfig};
pub use dispatcher::{DispatchError, Dispatcher, Route};
pub use operation::{OpId, Operation, StageMarker};
pub use pipeline::{Pipeline, PipelineError, PipelineStats};
pub use report::{
    ChannelSink, CollectingSink, CompletionEvent, LogSink, ReportSink, StdoutSink,
};
pub use results::{ResultsError, ResultsTable};
pub use stage::{Role, StageError};
pub use sync::{ShutdownFlag, Timeout};
pub use topology::CpuConfig;
pub use trace::init_tracing;
