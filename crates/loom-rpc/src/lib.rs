//! HTTP-style path dispatch for requests carried inside the wire relay
//! (spec §6).
//!
//! A client's `RelayMessage::Request` names a `method` (`GET`/`POST`/`PUT`)
//! and a `path` (`/projects/:id/sessions/:sid`); [`registry::PathRegistry`]
//! resolves that pair against the handlers in [`handlers`] and returns a
//! JSON body plus an HTTP-ish status code for the caller (`loom-server`) to
//! wrap back into a `RelayMessage::Response`. Persistence is injected
//! through [`context::RpcContext`] rather than owned here, the same way
//! `loom_wire::srp_auth` takes its credential and session stores as trait
//! objects.

#![warn(missing_docs)]

pub mod context;
pub mod handlers;
mod path;
pub mod registry;
pub mod types;

pub use context::{MetadataStore, ProjectDirectory, RpcContext, SessionIndex};
pub use handlers::register_all;
pub use path::PathPattern;
pub use registry::{PathHandler, PathRegistry, PathRequest};
pub use types::{InboxView, SessionListFilter, SessionMetadata, SessionSummary};
