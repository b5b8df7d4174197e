//! Inbound port. The presentation layer calls into the application.

use crate::domain::{RawRequest, Response};
use crate::shared::cancel::CancellationToken;
use serde_json::Value;

/// Input port: forms/CLI submit structured operation requests.
#[async_trait::async_trait]
pub trait AutomationPort: Send + Sync {
    /// Validate, resolve, apply and report one request. Never fails: every
    /// error is folded into the returned response.
    async fn submit(&self, request: RawRequest, cancel: CancellationToken) -> Response;

    /// Same as `submit` for an unparsed envelope. A malformed envelope gets
    /// its own validation response.
    async fn submit_json(&self, request: Value, cancel: CancellationToken) -> Response;
}
