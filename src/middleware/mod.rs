//! HTTP middleware components.
//!
//! Middleware run before route handlers. They can reject a request early or
//! attach data to it for the handlers.

/// Internal API key and gateway identity middleware
pub mod auth;
