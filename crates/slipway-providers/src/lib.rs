//! slipway-providers — interfaces to the pipeline's external collaborators.
//!
//! The coordinator depends only on these traits' documented success/error
//! contracts, never on transport details. Concrete clients (GitHub, Play
//! Store, App Store, Slack, ...) implement them elsewhere; each provider is
//! selected once at construction time, not dispatched by name at call sites.
//!
//! Errors split into transient (retryable, entity state untouched) and
//! permanent (surfaced to the caller as-is).
//!
//! The `fake` module carries in-memory implementations with programmable
//! failure injection; they back tests across the workspace the same way the
//! in-memory state store backend does.

pub mod error;
pub mod fake;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use fake::{FakeCi, FakeNotifier, FakeStore, FakeVcs, StoreCall};
pub use traits::{
    ArtifactInfo, CiProvider, CiRunStatus, HealthVerdict, Notifier, StoreProvider, VcsProvider,
};
