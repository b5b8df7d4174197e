//! Target-system adapters. Implement `TargetSystem`.

pub mod fake;
pub mod http;

pub use fake::FakePlatform;
pub use http::HttpPlatform;
