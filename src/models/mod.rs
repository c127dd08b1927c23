//! Data models.
//!
//! This module contains the event, channel, and workflow structures shared by
//! handlers, services, and the workflow engine.

/// Domain events carried on the bus
pub mod event;
/// Realtime channel naming rules
pub mod channel;
/// Realtime vendor payloads
pub mod realtime;
/// Workflow run records
pub mod workflow;
