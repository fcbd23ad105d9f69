//! Actor side of the queue monitor.
//!
//! This crate provides the Ractor-based controller that owns the monitor's
//! session and view state.
//!
//! # Architecture
//!
//! - `MonitorActor` - single consumer of every event: user actions, poll
//!   ticks, change notifications and query results
//! - `PollScheduler` - one-shot timer re-armed after each tick
//! - `ViewSink` - receives a `MonitorView` snapshot after each message
//!
//! # Usage
//!
//! ```ignore
//! use actors::{MonitorArgs, MonitorMessage, start_monitor};
//! use db::{PgConnector, PoolSettings};
//!
//! let args = MonitorArgs::new(PgConnector::new(PoolSettings::default()), config, "local");
//! let (monitor, handle) = start_monitor(args).await?;
//!
//! monitor.send_message(MonitorMessage::SwitchQueue { queue: "emails".into() })?;
//! ```

mod messages;
mod monitor_actor;
mod scheduler;
mod state;
mod view;

pub use messages::{MonitorError, MonitorMessage};
pub use monitor_actor::{MonitorActor, MonitorArgs, MonitorSettings, MonitorState, start_monitor};
pub use scheduler::PollScheduler;
pub use state::{
    ConnectionState, Notice, PendingAction, Picker, PickerKind, SecondaryView, StatusFilter,
};
pub use view::{MonitorView, NullView, ViewSink};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
