//! Realtime status channel for the lab console.
//!
//! Keeps one authenticated WebSocket open to the backend, correlates
//! request/response queries by `msg_uuid`, maintains a map of resource
//! online state from `status_update` pushes and reconnects at a fixed
//! interval up to a capped number of attempts.

pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod subscribers;
pub mod token;
pub mod types;

pub use channel::StatusChannel;
pub use config::{ChannelConfig, ReconnectConfig};
pub use error::{ChannelError, Result};
pub use protocol::{InboundEnvelope, InboundMessage, OutboundMessage};
pub use subscribers::Subscription;
pub use token::{StaticToken, TokenProvider};
pub use types::{ConnectionState, StatusEntry};
