//! # parley-shared
//!
//! Types shared by the Parley storage layer, the real-time server and its
//! clients: strongly typed ids, the wire protocol, the call state machine and
//! the bearer token format.

pub mod call;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::AuthError;
pub use types::*;
