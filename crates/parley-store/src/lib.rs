//! # parley-store
//!
//! SQLite persistence for Parley. The crate exposes a synchronous `Database`
//! handle that wraps a `rusqlite::Connection` with typed CRUD helpers for
//! every domain model, and the narrow repository traits the real-time core
//! consumes, implemented by [`SqliteStore`].

pub mod calls;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod reactions;
pub mod receipts;
pub mod repository;
pub mod users;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use repository::*;
