//! Port traits. API boundaries for the hexagon.
//!
//! - Inbound: Called by the presentation layer into the application
//! - Outbound: Called by the application into infrastructure

pub mod inbound;
pub mod outbound;

pub use inbound::AutomationPort;
pub use outbound::{ReviewJournalPort, TargetSystem};
