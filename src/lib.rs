//! Real-time voice booking gateway.
//!
//! Bridges a telephony WebSocket to an upstream Realtime API session,
//! transcodes audio both ways, drives a taxi-booking dialog state machine
//! over the model's tool calls, and coordinates an external dispatch
//! backend for fare quotes and confirmation.

pub mod audio;
pub mod booking;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod persistence;
pub mod protection;
pub mod router;
pub mod session;
pub mod transcript;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
