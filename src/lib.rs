//! ChefNext API Library
//!
//! Identity and request-access control for the ChefNext marketplace:
//! token issuance and verification, revocable sessions, and the interceptor
//! chain every inbound call passes through.

pub mod auth;
pub mod config;
pub mod middleware;
pub mod server;

pub use config::AuthConfig;
