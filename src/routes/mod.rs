// # Routes Module
//
// HTTP route handlers, organized by functionality:
// - `health`: liveness endpoint
// - `auth`: registration, login, refresh, logout and account endpoints
// - `admin`: account administration behind the `admin` role

/// Health check endpoint
pub mod health;

/// Authentication endpoints
pub mod auth;

/// Administration endpoints
pub mod admin;
