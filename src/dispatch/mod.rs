//! Asynchronous dispatch request/callback coordination (§4.5).

pub mod coordinator;
pub mod registry;
pub mod transport;
pub mod webhook;

pub use coordinator::{DispatchCoordinator, DispatchEvent};
pub use registry::ChannelRegistry;
pub use transport::{DispatchTransport, HttpDispatchTransport};
pub use webhook::{CallbackEvent, DispatchAction, QuoteRequestFields, WebhookPayload, WebhookResponse};
