//! Shared primitives for the job engine.
//!
//! Identifiers, closed name sets, and validation errors only; no runtime concerns.

pub mod error;
pub mod id;
pub mod names;

pub use error::{ValidationError, ValidationResult};
pub use id::{BatchId, JobId};
pub use names::{JobType, QueueName};
