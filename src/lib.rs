//! course-automator: creates courses, editions, activities and enrollments on an
//! external course-management platform, with Hexagonal Architecture.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
