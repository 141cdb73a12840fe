// tillpoint-api: async client for the Tillpoint POS backend
// (service discovery, live channel, REST)

pub mod discovery;
pub mod error;
pub mod live;
pub mod rest;
pub mod retry;
pub mod transport;

pub use discovery::{DiscoveryClient, DiscoveryConfig, DiscoveryEvent, ServiceAdvertisement};
pub use error::Error;
pub use live::{ConnectionState, LiveClient, LiveConfig, LiveEvent, OutboundMessage};
pub use rest::ApiClient;
pub use retry::{BudgetSnapshot, CloseReason, RetryBudget, RetryPolicy};
pub use transport::{TlsMode, TransportConfig};
