//! Business logic services.
//!
//! Services contain the core logic separated from HTTP handlers: the event
//! bus and its realtime bridge, the realtime vendor client, channel
//! authorization, outbound calls to internal services, and run persistence.

pub mod channel_auth;
pub mod event_bridge;
pub mod event_bus;
pub mod gateway;
pub mod realtime_service;
pub mod run_store;

#[cfg(test)]
pub mod testing;
