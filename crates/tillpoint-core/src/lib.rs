// tillpoint-core: session lifecycle, local state and checkout between
// tillpoint-api and its consumers (CLI).

pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod health;
pub mod profile;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cart::{Cart, CartItem};
pub use checkout::{Checkout, CompletedSale};
pub use config::{SessionConfig, TlsVerification};
pub use error::CoreError;
pub use health::{HealthMonitor, ServerStatus};
pub use profile::ProfileStore;
pub use session::{LiveStatus, Notice, Session};

pub use tillpoint_api::rest::models::UserProfile;
pub use tillpoint_api::{ConnectionState, ServiceAdvertisement};
