//! PostgreSQL access for the job queue monitor.
//!
//! This crate provides the read-only query gateway, the LISTEN/NOTIFY
//! subscription channel, and session management that pairs the two.
//!
//! # Seams
//!
//! - [`JobStore`]: typed reads, implemented by [`QueryGateway`]
//! - [`NotificationSource`]: a listening connection, implemented by `PgListener`
//! - [`Connector`]: opens both for a profile, implemented by [`PgConnector`]

mod connection;
mod gateway;
pub mod listener;
pub mod repositories;
pub mod schema;
mod session;

pub use connection::{
    ConnectError, PoolSettings, StoreError, connect_options, open_listener, open_pool, ping,
};
pub use gateway::{JobStore, QueryGateway};
pub use listener::{Delivery, NotificationSource, SubscriptionChannel, SubscriptionHandle};
pub use repositories::JobFilter;
pub use session::{Connector, PgConnector, Session, SessionManager};
