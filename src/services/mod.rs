//! # Services Module
//!
//! Business logic orchestrating the authentication components.

pub mod auth_gateway;

pub use auth_gateway::{AuthGateway, GatewaySettings};
