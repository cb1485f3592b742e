//! # Grade API
//!
//! REST service for registering grades against students and content owned
//! by remote services.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Axum HTTP Server                         │
//! │               (/api/grades, /health)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GradeService                            │
//! └─────────────────────────────────────────────────────────────┘
//!           │                  │                     │
//!           ▼                  ▼                     ▼
//! ┌──────────────────┐ ┌────────────────┐ ┌────────────────────────┐
//! │ DependencyGateway│ │   GradeCache   │ │    GradeRepository     │
//! │ breaker + retry  │ │ (Redis, TTLs)  │ │ (ScyllaDB, source of   │
//! │ login / content  │ │                │ │  truth)                │
//! └──────────────────┘ └────────────────┘ └────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use context::ApiContext;
pub use error::{ApiError, ApiResult, StartupError};

/// Build the Axum router.
///
/// `cors_origins` containing `*` allows any origin; unparseable entries are
/// skipped.
pub fn build_router(ctx: ApiContext, cors_origins: &[String]) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(allowed_origins(cors_origins))
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/grades",
            post(handlers::create_grade).get(handlers::list_grades),
        )
        .route("/api/grades/average", get(handlers::grade_average))
        .route(
            "/api/grades/{id}",
            get(handlers::get_grade)
                .patch(handlers::update_grade)
                .delete(handlers::delete_grade),
        )
        // Health check
        .route("/health", get(handlers::health_check))
        // State and middleware
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|origin| origin == "*") {
        return AllowOrigin::any();
    }

    let parsed = origins.iter().filter_map(|origin| {
        HeaderValue::from_str(origin)
            .map_err(|_| tracing::warn!(%origin, "Ignoring invalid CORS origin"))
            .ok()
    });
    AllowOrigin::list(parsed)
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
