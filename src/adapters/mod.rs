//! Infrastructure adapters. Implement outbound ports.
//!
//! Platform API, in-memory sandbox, review journal. Map errors to TargetError or DomainError.

pub mod persistence;
pub mod platform;
