//! # Channel Server
//!
//! The scheduling core of one game channel, built on the `world_core`
//! worker substrate.
//!
//! ## Architecture Overview
//!
//! * **Workers** - a main worker, a queue worker that runs the tick, and N
//!   generic workers that own client connections
//! * **Tick driver** - a `tick` thread enqueuing a `Tick` every interval,
//!   never more than the backlog cap ahead of the queue worker
//! * **Tick handler** - advances zones, drains the persistence queues,
//!   expires idle sessions, reports crossed world clock events and delivers
//!   scheduled work, in that order
//! * **World clock** - cached in-game calendar with a lock-free read path
//! * **Connections** - DashMap registry mapping sessions, entities and
//!   worker leases, plus a tokio accept loop speaking the length-prefixed
//!   frame protocol
//!
//! ## Message Flow
//!
//! 1. A client frame is decoded by its connection task
//! 2. It is enqueued as a `Packet` message on the connection's worker
//! 3. The worker offers it to the [`PacketManager`], which replies through
//!    the [`ConnectionManager`]
//!
//! ## Example
//!
//! ```rust
//! use channel_server::{create_server, ServerConfig};
//! use world_core::Work;
//! use std::time::Duration;
//!
//! let mut server = create_server(ServerConfig {
//!     worker_count: 1,
//!     enable_network: false,
//!     ..Default::default()
//! })
//! .unwrap();
//! server.start().unwrap();
//! server.schedule_work_in(Duration::from_millis(10), Work::new("greet", || println!("hi")));
//! server.shutdown().unwrap();
//! ```

pub use clock::{ClockEvents, ClockTrigger, WorldClock, WorldClockService};
pub use config::ServerConfig;
pub use connection::{CloseReason, ConnectionManager, Outbound, SessionRegistry};
pub use error::{ClockError, ServerError, StoreError};
pub use health::{HealthCheckResult, HealthStatus, HealthThresholds, MetricsCollector};
pub use messaging::{InternalManager, PacketManager, PacketParser};
pub use persistence::{BackingStore, ChangeSet, EntityId, MemoryStore, TransactionDrain};
pub use schedule::ScheduledWorkTable;
pub use server::{ChannelServer, ServerStats};
pub use tick::{TickBacklog, TickDriver, TickHandler};
pub use utils::{create_server, create_server_with_stores};
pub use zone::{ActiveZones, ClockListener, ZoneStateUpdater};

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod messaging;
pub mod persistence;
pub mod schedule;
pub mod server;
pub mod tick;
pub mod utils;
pub mod zone;

mod tests;
