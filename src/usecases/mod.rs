//! Application use cases. Orchestrate domain logic via ports.

pub mod automation_service;
pub mod plan;
pub mod reporter;
pub mod resolver;
pub mod sequencer;
pub mod session_pool;
pub mod validator;

pub use automation_service::AutomationService;
pub use resolver::Resolver;
pub use sequencer::Sequencer;
pub use session_pool::{SessionGuard, SessionPool};
pub use validator::validate;
