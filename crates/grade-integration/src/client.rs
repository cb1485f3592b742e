//! # Remote Clients
//!
//! Fetch contract for the services that own students and content, plus the
//! reqwest implementation used in production.
//!
//! | Service          | Path                          | Record          |
//! |------------------|-------------------------------|-----------------|
//! | login service    | `{base}/api/usuarios/{id}`    | `StudentRecord` |
//! | content service  | `{base}/api/conteudos/{id}`   | `ContentRecord` |

use async_trait::async_trait;
use reqwest::{StatusCode, Url, redirect};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RemoteError;
use grade_domain::{ContentRecord, StudentRecord};

/// Fetches one entity by id from the service that owns it
#[async_trait]
pub trait RemoteClient: Send + Sync {
    type Record: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// # Errors
    ///
    /// [`RemoteError::NotFound`] when the service reports the entity absent,
    /// [`RemoteError::Unavailable`] for every other failure.
    async fn fetch(&self, id: &str) -> Result<Self::Record, RemoteError>;
}

pub type SharedStudentClient = Arc<dyn RemoteClient<Record = StudentRecord>>;
pub type SharedContentClient = Arc<dyn RemoteClient<Record = ContentRecord>>;

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// HTTP client configuration for one remote service
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_millis(5000),
            max_redirects: 5,
        }
    }
}

/// reqwest-backed [`RemoteClient`] for a JSON resource collection
pub struct HttpRemoteClient<R> {
    client: reqwest::Client,
    base_url: Url,
    resource: &'static str,
    _record: PhantomData<fn() -> R>,
}

pub type HttpStudentClient = HttpRemoteClient<StudentRecord>;
pub type HttpContentClient = HttpRemoteClient<ContentRecord>;

impl HttpRemoteClient<StudentRecord> {
    /// Client for the login service's user collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn login_service(config: &HttpClientConfig) -> Result<Self, RemoteError> {
        Self::build(config, "usuarios")
    }
}

impl HttpRemoteClient<ContentRecord> {
    /// Client for the content service's collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn content_service(config: &HttpClientConfig) -> Result<Self, RemoteError> {
        Self::build(config, "conteudos")
    }
}

impl<R> HttpRemoteClient<R> {
    fn build(config: &HttpClientConfig, resource: &'static str) -> Result<Self, RemoteError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RemoteError::Unavailable(format!("invalid base URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Unavailable(format!(
                "base URL {} cannot carry a path",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            base_url,
            resource,
            _record: PhantomData,
        })
    }

    /// `{base}/api/{resource}/{id}` with `id` as a single escaped segment
    fn entity_url(&self, id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", self.resource, id]);
        }
        url
    }
}

#[async_trait]
impl<R> RemoteClient for HttpRemoteClient<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Record = R;

    async fn fetch(&self, id: &str) -> Result<R, RemoteError> {
        let url = self.entity_url(id);
        tracing::debug!(%url, "Fetching remote entity");

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound { id: id.to_string() }),
            status if status.is_success() => Ok(response.json::<R>().await?),
            status => Err(RemoteError::Unavailable(format!(
                "{} responded with {status}",
                self.resource
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn user(Path(id): Path<String>) -> axum::response::Response {
        match id.as_str() {
            "s1" => Json(serde_json::json!({
                "id": "s1",
                "nome": "Ana",
                "email": "ana@example.com"
            }))
            .into_response(),
            "broken" => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/api/usuarios/{id}", get(user));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_entity_url_escapes_id() {
        let client = HttpStudentClient::login_service(&HttpClientConfig::new(
            "http://conteudo-service:3000/conteudo",
        ))
        .unwrap();
        assert_eq!(
            client.entity_url("a/b").as_str(),
            "http://conteudo-service:3000/conteudo/api/usuarios/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpContentClient::content_service(&HttpClientConfig::new("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let base = serve().await;
        let client = HttpStudentClient::login_service(&HttpClientConfig::new(base)).unwrap();

        let record = client.fetch("s1").await.unwrap();
        assert_eq!(record.nome, "Ana");

        assert_eq!(
            client.fetch("missing").await.unwrap_err(),
            RemoteError::NotFound {
                id: "missing".into()
            }
        );
        assert!(matches!(
            client.fetch("broken").await,
            Err(RemoteError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpStudentClient::login_service(&HttpClientConfig::new(format!("http://{addr}")))
                .unwrap();
        assert!(matches!(
            client.fetch("s1").await,
            Err(RemoteError::Unavailable(_))
        ));
    }
}
