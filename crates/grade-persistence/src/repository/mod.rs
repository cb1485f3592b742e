//! # Repository Module
//!
//! Primary-store implementations for grade records.

pub mod memory;
#[cfg(feature = "scylla")]
pub mod scylla_impl;
pub mod traits;

pub use memory::InMemoryGradeRepository;
#[cfg(feature = "scylla")]
pub use scylla_impl::{ScyllaClient, ScyllaConfig, ScyllaGradeRepository};
pub use traits::{GradeRepository, SharedGradeRepository};
