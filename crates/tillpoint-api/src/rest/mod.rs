// REST client modules
//
// Hand-written client for the store backend's `/api/v1` endpoints used by
// the session and the till: user auth, sales, and the health probe.

pub mod auth;
pub mod client;
pub mod health;
pub mod models;
pub mod sales;

pub use client::ApiClient;
