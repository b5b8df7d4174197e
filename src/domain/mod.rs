//! Core domain layer. No external I/O dependencies.
//!
//! Entities, request/response contracts and the error taxonomy live here.
//! Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod outcome;
pub mod request;
pub mod response;

pub use entities::{
    ActivityFields, CourseFields, CreatedEntity, Credentials, EditionFields, EntityId, EntityKind,
    Notifications, PlatformSession, RequestKey, Schedule, StudentIdentity, canonical_name,
};
pub use errors::{DomainError, ErrorClass, ErrorKind, FieldIssue, TargetError, ValidationError};
pub use outcome::{ExecutionResult, Failure, ItemOutcome, Outcome, ReviewEntry};
pub use request::{RawRequest, ResolvedRequest, ValidatedRequest};
pub use response::{
    BatchCounts, BatchFailure, BatchResponse, BatchSuccess, Response, SingleResponse, Status,
};
