//! Foundation types shared by every loom crate.
//!
//! - Branded IDs ([`ids`]): [`SessionId`], [`ProcessId`], [`ProjectId`],
//!   [`ConnectionId`], [`SubscriptionId`], [`UploadId`], [`InputRequestId`].
//! - Transcript domain types ([`message`]): [`Message`], [`ContentBlock`],
//!   [`MessageType`].
//! - [`Project`] ([`project`]).
//! - Error hierarchy ([`errors`]): [`LoomError`] and the domain error
//!   structs it wraps.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod project;

pub use errors::LoomError;
pub use ids::{ConnectionId, InputRequestId, ProcessId, ProjectId, SessionId, SubscriptionId, UploadId};
pub use message::{ContentBlock, Message, MessageSource, MessageType};
pub use project::Project;
