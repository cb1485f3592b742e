//! # Grade Integration
//!
//! Everything that talks to the services owning students and content:
//! the [`RemoteClient`] contract, its reqwest implementation, and the
//! [`DependencyGateway`] that wraps lookups in cache, breaker and retry.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let students = HttpStudentClient::login_service(&HttpClientConfig::new(login_url))?;
//! let contents = HttpContentClient::content_service(&HttpClientConfig::new(content_url))?;
//!
//! let gateway = DependencyGateway::new(
//!     breakers,
//!     retry,
//!     cache,
//!     Arc::new(students),
//!     Arc::new(contents),
//! );
//!
//! let exists = gateway
//!     .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::AssumeExists)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod gateway;

pub use client::{
    HttpClientConfig, HttpContentClient, HttpRemoteClient, HttpStudentClient, RemoteClient,
    SharedContentClient, SharedStudentClient,
};
pub use error::{GatewayError, RemoteError};
pub use gateway::{DependencyGateway, UnavailablePolicy};
