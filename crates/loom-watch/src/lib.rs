//! Filesystem change detection (spec §4.2 "Watcher + EventBus").
//!
//! Owns no global state: [`init`] builds an [`EventBus`] and starts a
//! watcher task explicitly, returning [`WatchHandles`] the caller must hold
//! and eventually pass to [`shutdown`]. Every filesystem event is
//! classified by path prefix and coalesced within a 50 ms window before
//! publication, so a burst of writes to one session file reaches
//! subscribers as a single `Modified` event.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod classify;
mod watcher;

pub use bus::{ChangeKind, EventBus, WatchEvent};
pub use classify::{ClassifyRoots, PathKind};
pub use watcher::{init, shutdown, WatchHandles};
