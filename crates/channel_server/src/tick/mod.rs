//! The tick: driver, backlog and handler.

pub mod backlog;
pub mod driver;
pub mod handler;
pub mod system;

pub use backlog::{BacklogSnapshot, TickAdmission, TickBacklog};
pub use driver::{FireOutcome, TickDriver};
pub use handler::{TickHandler, TickReport};
pub use system::{SystemManager, WorkExecutor};
