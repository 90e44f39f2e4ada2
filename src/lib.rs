//! Keeps remote Talk rooms consistent with calendar events.
//!
//! Events carry their room association inside `X-NCTALK-*` properties of
//! their own iCalendar payload (see the `talksync-core` crate). This crate
//! is the engine around that payload layer: it reacts to calendar lifecycle
//! notifications, pushes lobby/start updates, syncs invitees, transfers
//! ownership to a delegate, reclaims rooms left behind by abandoned edits,
//! and answers the editor dialog's requests.
//!
//! The host integration supplies the outside world through the port traits
//! in [`ports`] and drives a single [`sync::SyncEngine`], the context object
//! owning the caches, guards, scheduler and sessions.

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod delegation;
pub mod dispatch;
pub mod error;
pub mod invitees;
pub mod ports;
pub mod session;
pub mod store;
pub mod sync;
mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use cleanup::{CleanupScheduler, CleanupSignal};
pub use config::AccountConfig;
pub use dispatch::{DispatchRequest, MetadataPatch, Reply, RoomTrackUpdate};
pub use error::{SyncError, SyncResult};
pub use sync::{Outcome, SkipReason, SyncEngine};
