//! slipway-lock — named, TTL'd mutual exclusion for pipeline entities.
//!
//! The release/rollout row is the unit of locking: any transition commits
//! only while holding that entity's lock (`"rollout:<id>"`). Queue ordering
//! gives no serialization guarantee, so two jobs touching the same entity
//! can run concurrently; the lock manager is what serializes them.
//!
//! Locks expire after their TTL so a crashed holder cannot wedge an entity
//! forever. The TTL must exceed the worst-case provider call latency, or a
//! second worker could reacquire mid-operation. Generation tokens make
//! release safe: an expired holder dropping its guard cannot release the
//! lock a successor now owns.
//!
//! Contention past the retry budget surfaces as the distinct
//! [`LockError::NotAcquired`] — not a domain error — so callers decide
//! whether "try again later" is itself retryable.

pub mod manager;

pub use manager::{LockError, LockGuard, LockManager};
