//! Cross-cutting building blocks shared by the rotation coordinator crates.
//!
//! Nothing here knows about outbox messages or swaps: only tracing setup,
//! health classification and the retry policy used by every retrying loop.

pub mod health;
pub mod retry;
pub mod tracing;
