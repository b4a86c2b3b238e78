//! Lifecycle management for dedicated game-server instances.
//!
//! The crate drives named server instances that each live in their own
//! directory and run inside a detached terminal-multiplexer session. State is
//! derived from two sources only: the session list and the append-only server
//! log, which [`logstate`] replays from the start on every query.
//!
//! - [`properties`] reads, writes and layers the `key=value` files all
//!   persisted configuration is kept in.
//! - [`session`] abstracts the multiplexer behind [`session::SessionRunner`].
//! - [`lifecycle`] creates, starts, stops, updates and removes instances
//!   through [`lifecycle::ServerManager`].
//! - [`backup`] keeps incremental, deduplicated world backups.
//! - [`versions`], [`worlds`] and [`players`] cover distribution downloads,
//!   world directories and the player registry.
//! - [`fanout`] runs single-instance operations across every instance on a
//!   bounded worker pool.
//! - [`scheduler`] hosts the job scheduler daemon and edits its job file.
//!
//! Every error implements [`Coded`]; the process edge converts it into an
//! [`ErrorReport`] and wraps results in an [`Envelope`].

pub mod backup;
mod envelope;
mod error;
pub mod fanout;
mod fsutil;
pub mod lifecycle;
pub mod logstate;
pub mod players;
pub mod properties;
pub mod scheduler;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod versions;
pub mod worlds;

pub use envelope::Envelope;
pub use error::{Coded, ErrorReport};
pub use fsutil::RemoveTreeError;
