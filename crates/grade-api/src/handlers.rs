//! REST handlers for `/api/grades` and `/health`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use uuid::Uuid;

use crate::context::ApiContext;
use crate::error::{ApiError, ApiResult};
use grade_domain::{
    CreateGradeInput, FilterScope, Grade, GradeAverage, GradeFilter, UpdateGradeInput,
};
use grade_resilience::BreakerSnapshot;

pub async fn create_grade(
    State(ctx): State<ApiContext>,
    payload: Result<Json<CreateGradeInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Grade>)> {
    let Json(input) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let grade = ctx.service.create(input).await?;
    Ok((StatusCode::CREATED, Json(grade)))
}

pub async fn list_grades(
    State(ctx): State<ApiContext>,
    filter: Result<Query<GradeFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<Grade>>> {
    let Query(filter) = filter.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    Ok(Json(ctx.service.find_all(&filter).await?))
}

pub async fn grade_average(
    State(ctx): State<ApiContext>,
    filter: Result<Query<GradeFilter>, QueryRejection>,
) -> ApiResult<Json<GradeAverage>> {
    let Query(filter) = filter.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    if matches!(filter.scope(), FilterScope::Unfiltered) {
        return Err(ApiError::InvalidInput(
            "studentId or contentId is required".to_string(),
        ));
    }
    Ok(Json(ctx.service.calculate_average(&filter).await?))
}

pub async fn get_grade(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Grade>> {
    let id = Uuid::parse_str(&id)?;
    Ok(Json(ctx.service.find_one(id).await?))
}

pub async fn update_grade(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateGradeInput>, JsonRejection>,
) -> ApiResult<Json<Grade>> {
    let id = Uuid::parse_str(&id)?;
    let Json(input) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    Ok(Json(ctx.service.update(id, input).await?))
}

pub async fn delete_grade(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = Uuid::parse_str(&id)?;
    ctx.service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    version: &'static str,
    breakers: Vec<BreakerSnapshot>,
}

/// Health check endpoint with breaker states
pub async fn health_check(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(HealthReport {
        status: "ok",
        version: crate::VERSION,
        breakers: ctx.breaker_snapshots(),
    })
}
