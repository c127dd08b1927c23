//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, form, URL params)
//! 2. Hands the work to the bus, the realtime client, or the scheduler
//! 3. Returns HTTP response (JSON, status code)

/// Domain event ingestion
pub mod events;
/// Health check endpoint
pub mod health;
/// Channel authorization and bulk notifications
pub mod realtime;
/// Workflow listing, triggering, and run lookup
pub mod workflows;
