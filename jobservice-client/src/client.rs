//! HTTP transport for the job service.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::Method;
use http_body_util::BodyExt as _;
use hyperdriver::service::SharedService;
use hyperdriver::Body;
use tower::ServiceExt as _;
use url::Url;

use crate::auth::{Secret, SecretAuthLayer};
use crate::models::{ActionRequest, Envelope, JobAction, JobRequest, JobStats};
use crate::{JobService, JobServiceError};

/// Default time allowed for a single round trip to the job service.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A [JobService] which talks to a remote job service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobService {
    base: Url,
    inner: hyperdriver::client::SharedClientService<Body, Body>,
    secret: Arc<ArcSwap<Secret>>,
    timeout: Duration,
}

impl HttpJobService {
    /// Create a client for the job service rooted at `base`.
    pub fn new(base: Url, secret: Secret) -> Self {
        let secret = Arc::new(ArcSwap::new(Arc::new(secret)));
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .layer(SecretAuthLayer::new(secret.clone()))
            .build_service();

        HttpJobService {
            base: with_trailing_slash(base),
            inner,
            secret,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client which sends requests through a provided service.
    pub fn new_with_inner_service<S>(base: Url, secret: Secret, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<Body>,
                Response = http::Response<Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let secret = Arc::new(ArcSwap::new(Arc::new(secret)));

        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(SecretAuthLayer::new(secret.clone()))
            .service(inner);

        HttpJobService {
            base: with_trailing_slash(base),
            inner: service,
            secret,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the shared secret used for subsequent requests.
    pub fn rotate_secret(&self, secret: Secret) {
        self.secret.store(Arc::new(secret));
    }

    fn endpoint(&self, path: &str) -> Result<http::Uri, JobServiceError> {
        let url = self
            .base
            .join(path)
            .map_err(|error| JobServiceError::Url(error.to_string()))?;
        url.as_str()
            .parse()
            .map_err(|error: http::uri::InvalidUri| JobServiceError::Url(error.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Bytes, JobServiceError> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(self.endpoint(path)?)
            .header(http::header::ACCEPT, "application/json");

        let body = match body {
            Some(bytes) => {
                builder = builder.header(http::header::CONTENT_TYPE, "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        let request = builder.body(body)?;

        let exchange = async {
            let response = self.inner.clone().oneshot(request).await?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|error| JobServiceError::Body(error.into()))?
                .to_bytes();
            Ok::<_, JobServiceError>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| JobServiceError::Timeout(self.timeout))??;

        if !status.is_success() {
            tracing::debug!(%status, "job service refused {path}");
            return Err(JobServiceError::Status {
                status,
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes)
    }
}

fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait::async_trait]
impl JobService for HttpJobService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit(&self, job: &JobRequest) -> Result<String, JobServiceError> {
        let body = serde_json::to_vec(&Envelope { job })?;
        let bytes = self
            .send(Method::POST, "api/v1/jobs", Some(body.into()))
            .await?;
        let stats: Envelope<JobStats> = serde_json::from_slice(&bytes)?;
        Ok(stats.job.id)
    }

    async fn post_action(&self, uuid: &str, action: JobAction) -> Result<(), JobServiceError> {
        let body = serde_json::to_vec(&ActionRequest { action })?;
        self.send(
            Method::POST,
            &format!("api/v1/jobs/{uuid}"),
            Some(body.into()),
        )
        .await?;
        Ok(())
    }

    async fn log(&self, uuid: &str) -> Result<Bytes, JobServiceError> {
        self.send(Method::GET, &format!("api/v1/jobs/{uuid}/log"), None)
            .await
    }

    async fn status(&self, uuid: &str) -> Result<JobStats, JobServiceError> {
        let bytes = self
            .send(Method::GET, &format!("api/v1/jobs/{uuid}"), None)
            .await?;
        let stats: Envelope<JobStats> = serde_json::from_slice(&bytes)?;
        Ok(stats.job)
    }

    async fn executions(&self, uuid: &str) -> Result<Vec<JobStats>, JobServiceError> {
        let bytes = self
            .send(Method::GET, &format!("api/v1/jobs/{uuid}/executions"), None)
            .await?;
        let stats: Vec<Envelope<JobStats>> = serde_json::from_slice(&bytes)?;
        Ok(stats.into_iter().map(|envelope| envelope.job).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::models::JobStatus;

    #[derive(Debug, Clone, Default)]
    struct Recorded {
        method: Option<Method>,
        path: Option<String>,
        authorization: Option<String>,
        body: Option<Bytes>,
    }

    #[derive(Debug, Clone, Default)]
    struct MockJobService {
        responses: HashMap<String, (StatusCode, &'static str)>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl MockJobService {
        fn respond(mut self, path: &str, status: StatusCode, body: &'static str) -> Self {
            self.responses.insert(path.to_owned(), (status, body));
            self
        }
    }

    impl tower::Service<http::Request<Body>> for MockJobService {
        type Response = http::Response<Body>;
        type Error = hyperdriver::client::Error;
        type Future = std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
        >;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<Body>) -> Self::Future {
            let path = req.uri().path().to_owned();
            let (status, body) = self
                .responses
                .get(&path)
                .copied()
                .unwrap_or((StatusCode::NOT_FOUND, "no such job"));
            let recorded = self.recorded.clone();

            Box::pin(async move {
                let (parts, body_in) = req.into_parts();
                let bytes = body_in.collect().await.unwrap().to_bytes();
                {
                    let mut recorded = recorded.lock().unwrap();
                    recorded.method = Some(parts.method.clone());
                    recorded.path = Some(path);
                    recorded.authorization = parts
                        .headers
                        .get(http::header::AUTHORIZATION)
                        .map(|value| value.to_str().unwrap().to_owned());
                    recorded.body = Some(bytes);
                }

                Ok(http::Response::builder()
                    .status(status)
                    .body(Body::from(Bytes::from_static(body.as_bytes())))
                    .unwrap())
            })
        }
    }

    fn client(mock: MockJobService) -> HttpJobService {
        HttpJobService::new_with_inner_service(
            "http://jobservice:8080".parse().unwrap(),
            Secret::from("s3cr3t"),
            mock,
        )
    }

    #[tokio::test]
    async fn submit_returns_uuid() {
        let mock = MockJobService::default().respond(
            "/api/v1/jobs",
            StatusCode::ACCEPTED,
            r#"{"job":{"id":"u-1","name":"IMAGE_GC","kind":"Generic","status":"Pending"}}"#,
        );
        let recorded = mock.recorded.clone();
        let client = client(mock);

        let uuid = client.submit(&JobRequest::generic("IMAGE_GC")).await.unwrap();
        assert_eq!(uuid, "u-1");

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.method, Some(Method::POST));
        assert_eq!(recorded.authorization.as_deref(), Some("Harbor-Secret s3cr3t"));
        let body: serde_json::Value =
            serde_json::from_slice(recorded.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["job"]["name"], "IMAGE_GC");
    }

    #[tokio::test]
    async fn stop_posts_action() {
        let mock = MockJobService::default().respond("/api/v1/jobs/u-2", StatusCode::NO_CONTENT, "");
        let recorded = mock.recorded.clone();
        let client = client(mock);

        client.post_action("u-2", JobAction::Stop).await.unwrap();

        let recorded = recorded.lock().unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(recorded.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["action"], "stop");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let client = client(MockJobService::default());
        let err = client.status("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn status_and_executions_decode() {
        let mock = MockJobService::default()
            .respond(
                "/api/v1/jobs/p-1",
                StatusCode::OK,
                r#"{"job":{"id":"p-1","name":"IMAGE_GC","kind":"Periodic","status":"Scheduled"}}"#,
            )
            .respond(
                "/api/v1/jobs/p-1/executions",
                StatusCode::OK,
                r#"[{"job":{"id":"e-1","name":"IMAGE_GC","kind":"Generic","status":"Success","upstream_job_id":"p-1"}}]"#,
            );
        let client = client(mock);

        let stats = client.status("p-1").await.unwrap();
        assert_eq!(stats.status, JobStatus::Scheduled);

        let executions = client.executions("p-1").await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].upstream_job_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn rotated_secret_is_used() {
        let mock = MockJobService::default().respond("/api/v1/jobs/u-3/log", StatusCode::OK, "log");
        let recorded = mock.recorded.clone();
        let client = client(mock);
        client.rotate_secret(Secret::from("rotated"));

        let log = client.log("u-3").await.unwrap();
        assert_eq!(&log[..], b"log");
        assert_eq!(
            recorded.lock().unwrap().authorization.as_deref(),
            Some("Harbor-Secret rotated")
        );
    }

    #[test]
    fn base_gets_trailing_slash() {
        let base = with_trailing_slash("http://jobservice:8080/prefix".parse().unwrap());
        assert_eq!(base.as_str(), "http://jobservice:8080/prefix/");
    }
}
