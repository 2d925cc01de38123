//! slipway-state — embedded state store for the Slipway release pipeline.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for releases, platform runs, workflow runs, builds,
//! store submissions, rollouts, and health events.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{parent_id}:{child_id}`) keep related records adjacent.
//!
//! Status enums carry explicit transition tables (`machine` module): every
//! mutation goes through `transition(event)`, and an invalid transition is a
//! typed [`machine::TransitionError`], never a panic.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod machine;
pub mod store;
pub mod tables;
pub mod time;
pub mod types;

pub use error::{StateError, StateResult};
pub use machine::TransitionError;
pub use store::StateStore;
pub use time::epoch_secs;
pub use types::*;
