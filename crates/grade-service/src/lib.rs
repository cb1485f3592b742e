//! # Grade Service Library
//!
//! Grade aggregate: creation with dependency verification, uniqueness per
//! `(student, content)` pair, cache-aside reads and derived averages.
//!
//! ```text
//!   create ──► gateway.verify(student) ──► gateway.verify(content)
//!                     │
//!                     ▼
//!            pre-check pair ──► insert (store is final arbiter)
//!                     │
//!                     ▼
//!   invalidate lists/averages for S and C, cache grade:{id}
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod service;

pub use error::{GradeError, Result};
pub use service::GradeService;
