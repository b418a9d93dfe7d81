//! Server configuration.
//!
//! The actual fields live in [`loom_settings::types`], which covers
//! host/port/timeouts/paths/auth policy in one place — this module just
//! re-exports what `server.rs` needs rather than redefining an overlapping
//! shape.

pub use loom_settings::{AuthSettings, PathSettings, ServerSettings, Settings, TimeoutSettings};
