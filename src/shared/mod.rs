//! Cross-cutting helpers: configuration, retry policy, cancellation.

pub mod cancel;
pub mod config;
pub mod retry;
