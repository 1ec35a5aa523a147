//! # parley-server
//!
//! Real-time core of the Parley chat backend:
//! - **Identity resolution** of bearer credentials at the handshake
//! - **Connection registry** of live sessions per user
//! - **Presence** edges broadcast to every conversation a user is in
//! - **Message routing** with per-conversation ordering and offline fallback
//! - **Read receipts**, **reactions** and **call signaling**
//! - **Notification dispatch** on a bounded worker pool
//!
//! The [`hub::Hub`] wires these together; [`api`] and [`gateway`] expose it
//! over HTTP and WebSocket.

pub mod api;
pub mod calls;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod identity;
pub mod locks;
pub mod notifications;
pub mod presence;
pub mod rate_limit;
pub mod receipts;
pub mod registry;
pub mod relay;
pub mod router;

pub use hub::{Hub, SessionContext};
