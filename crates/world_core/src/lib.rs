//! # World Core
//!
//! The queue-based actor substrate the channel server is built on.
//!
//! * [`MessageQueue`] - blocking FIFO with dequeue-all and close semantics
//! * [`Message`] - a typed unit of work tagged with a [`MessageCategory`]
//! * [`Manager`] - a dispatch policy for one or more categories
//! * [`Worker`] - one queue, one thread, an ordered list of managers
//! * [`TimeSource`] - monotonic server time plus wall-clock seconds, passed
//!   explicitly to every worker
//!
//! Nothing in this crate knows about ticks, persistence or the world clock;
//! those are built on top of it by `channel_server`.
//!
//! ## Example
//!
//! ```rust
//! use world_core::{Message, SystemTimeSource, Work, Worker};
//!
//! let mut worker = Worker::new("example", SystemTimeSource::shared());
//! worker.start().unwrap();
//! worker
//!     .queue()
//!     .enqueue(Message::execute(Work::new("hello", || println!("hello"))))
//!     .unwrap();
//! worker.shutdown().unwrap();
//! ```

pub mod error;
pub mod manager;
pub mod message;
pub mod queue;
pub mod shutdown;
pub mod time;
pub mod worker;

pub use error::{ManagerError, QueueClosed, WorkerError};
pub use manager::{DispatchOutcome, DispatchTable, Disposition, Manager, WorkerContext, WorkerQueue};
pub use message::{
    ConnectionEvent, ConnectionId, CorrelationId, InternalNotification, Message, MessageBody,
    MessageCategory, PacketMessage, Work,
};
pub use queue::{DequeueStatus, MessageQueue};
pub use shutdown::ShutdownState;
pub use time::{
    duration_to_server_time, ManualTimeSource, ServerTime, SharedTimeSource, SystemTimeSource,
    TimeSource,
};
pub use worker::{least_loaded, Worker, WorkerHandle, WorkerLease, WorkerState, WorkerStats};
