//! Axum HTTP server and binary wire relay (spec §4.9, §6).
//!
//! Wires `loom-wire`'s framing/crypto/SRP primitives, `loom-rpc`'s path
//! dispatch, and `loom-runtime`'s Supervisor/Process registry into one
//! Axum application: `/healthz` and `/metrics` for operators, `/ws` for
//! clients. Persistence-backed implementations of `loom-rpc`'s
//! `ProjectDirectory`/`MetadataStore`/`SessionIndex` traits and
//! `loom-wire`'s `CredentialStore`/`ResumableSessionStore` traits live here
//! too, since those are deployment concerns neither crate owns.

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod credentials;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod project_directory;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod subscription;
pub mod upload;

pub use server::{AppState, LoomServer};
pub use shutdown::ShutdownCoordinator;
