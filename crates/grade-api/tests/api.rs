//! Router-level tests against in-memory store, cache and remote services.

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower::ServiceExt;

use grade_api::{ApiContext, build_router};
use grade_domain::{ContentRecord, StudentRecord};
use grade_integration::{DependencyGateway, RemoteClient, RemoteError, UnavailablePolicy};
use grade_persistence::{CacheTtl, GradeCache, InMemoryGradeRepository, MemoryCache};
use grade_resilience::{
    BreakerOptions, CircuitBreakerRegistry, RetryConfig, RetryPolicy, TracingEventSink,
};
use grade_service::GradeService;

struct Directory<R> {
    records: HashMap<String, R>,
    down: AtomicBool,
}

#[async_trait]
impl<R> RemoteClient for Directory<R>
where
    R: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    type Record = R;

    async fn fetch(&self, id: &str) -> Result<R, RemoteError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound { id: id.to_string() })
    }
}

struct TestApp {
    router: Router,
    students: Arc<Directory<StudentRecord>>,
}

fn app(policy: UnavailablePolicy) -> TestApp {
    let sink = Arc::new(TracingEventSink);
    let cache = GradeCache::new(Arc::new(MemoryCache::new()), CacheTtl::default());

    let students = Arc::new(Directory {
        records: ["s1", "s2"]
            .map(|id| {
                (
                    id.to_string(),
                    StudentRecord {
                        id: id.to_string(),
                        nome: format!("Aluno {id}"),
                        email: format!("{id}@escola.test"),
                    },
                )
            })
            .into_iter()
            .collect(),
        down: AtomicBool::new(false),
    });
    let contents = Arc::new(Directory {
        records: ["c1", "c2"]
            .map(|id| {
                (
                    id.to_string(),
                    ContentRecord {
                        id: id.to_string(),
                        titulo: format!("Conteudo {id}"),
                        curso: "Rust".into(),
                        descricao: None,
                        unidade: None,
                    },
                )
            })
            .into_iter()
            .collect(),
        down: AtomicBool::new(false),
    });

    let gateway = DependencyGateway::new(
        Arc::new(CircuitBreakerRegistry::new(
            BreakerOptions::default(),
            sink.clone(),
        )),
        RetryPolicy::new(
            RetryConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..RetryConfig::default()
            },
            sink,
        ),
        cache.clone(),
        students.clone(),
        contents,
    );

    let service = GradeService::new(
        Arc::new(InMemoryGradeRepository::new()),
        cache,
        Arc::new(gateway),
    )
    .with_unavailable_policy(policy);

    TestApp {
        router: build_router(ApiContext::new(Arc::new(service)), &["*".to_string()]),
        students,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn grade_body(student_id: &str, content_id: &str, value: f64) -> Value {
    json!({ "studentId": student_id, "contentId": content_id, "value": value })
}

#[tokio::test]
async fn test_create_and_fetch_grade() {
    let app = app(UnavailablePolicy::AssumeExists);

    let (status, created) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c1", 8.5)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["studentId"], "s1");
    assert_eq!(created["value"], 8.5);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&app.router, "GET", &format!("/api/grades/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_duplicate_grade_conflict() {
    let app = app(UnavailablePolicy::AssumeExists);
    let body = grade_body("s1", "c1", 7.0);

    let (status, _) = send(&app.router, "POST", "/api/grades", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, error) = send(&app.router, "POST", "/api/grades", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "DUPLICATE_GRADE");
}

#[tokio::test]
async fn test_unknown_student_not_found() {
    let app = app(UnavailablePolicy::AssumeExists);

    let (status, error) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("ghost", "c1", 5.0)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn test_unavailable_dependency_with_propagate_policy() {
    let app = app(UnavailablePolicy::Propagate);
    app.students.down.store(true, Ordering::SeqCst);

    let (status, error) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c1", 5.0)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["error"]["code"], "DEPENDENCY_UNAVAILABLE");
}

#[tokio::test]
async fn test_malformed_requests_rejected() {
    let app = app(UnavailablePolicy::AssumeExists);

    let (status, error) = send(&app.router, "GET", "/api/grades/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_UUID");

    let (status, error) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(json!({ "studentId": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_INPUT");

    let (status, error) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c1", 11.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_average_requires_filter() {
    let app = app(UnavailablePolicy::AssumeExists);

    let (status, error) = send(&app.router, "GET", "/api/grades/average", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_list_average_update_and_delete() {
    let app = app(UnavailablePolicy::AssumeExists);

    let (_, first) = send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c1", 6.0)),
    )
    .await;
    send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c2", 9.0)),
    )
    .await;

    let (status, list) = send(&app.router, "GET", "/api/grades?studentId=s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 2);

    let (status, average) =
        send(&app.router, "GET", "/api/grades/average?studentId=s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(average["totalNotas"], 2);
    assert_eq!(average["media"], 7.5);

    let id = first["id"].as_str().unwrap();
    let (status, updated) = send(
        &app.router,
        "PATCH",
        &format!("/api/grades/{id}"),
        Some(json!({ "value": 10.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["value"], 10.0);

    let (_, average) = send(&app.router, "GET", "/api/grades/average?studentId=s1", None).await;
    assert_eq!(average["media"], 9.5);

    let (status, _) = send(&app.router, "DELETE", &format!("/api/grades/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = send(&app.router, "GET", &format!("/api/grades/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "GRADE_NOT_FOUND");
}

#[tokio::test]
async fn test_health_reports_breakers() {
    let app = app(UnavailablePolicy::AssumeExists);
    send(
        &app.router,
        "POST",
        "/api/grades",
        Some(grade_body("s1", "c1", 8.0)),
    )
    .await;

    let (status, health) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let breakers = health["breakers"].as_array().unwrap();
    assert!(
        breakers
            .iter()
            .any(|b| b["dependency"] == "login-service" && b["state"] == "closed")
    );
}
