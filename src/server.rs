//! HTTP request layer over a [`RenderService`]

use crate::{JobRequest, RenderError, RenderService};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RenderService>,
    /// Present when Prometheus export is enabled
    pub prometheus: Option<PrometheusHandle>,
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/html", post(render_html))
        .route("/png", post(render_png))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), RenderError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening for render requests");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped accepting connections");
    Ok(())
}

impl From<JsonRejection> for RenderError {
    fn from(rejection: JsonRejection) -> Self {
        RenderError::InvalidJob(rejection.body_text())
    }
}

async fn render_html(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Response, RenderError> {
    let Json(request) = payload?;
    let html = state.service.render_html(request).await?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
}

async fn render_png(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Response, RenderError> {
    let Json(request) = payload?;
    let png = state.service.render_png(request).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.service.health()).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics export is disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use crate::{Config, Metrics};
    use std::time::Duration;

    async fn state() -> AppState {
        let config = Config {
            pool_size: 1,
            job_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let service = RenderService::with_factory(config, Arc::new(ScriptedFactory::new()), Arc::new(Metrics::noop()))
            .await
            .unwrap();
        AppState {
            service: Arc::new(service),
            prometheus: None,
        }
    }

    fn request(url: &str) -> Result<Json<JobRequest>, JsonRejection> {
        Ok(Json(JobRequest {
            url: url.to_string(),
            ..Default::default()
        }))
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_html_endpoint() {
        let response = render_html(State(state().await), request("data:text/html,<p>hi</p>"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(body(response).await, b"<p>hi</p>");
    }

    #[tokio::test]
    async fn test_png_endpoint() {
        let response = render_png(State(state().await), request("https://ok.test"))
            .await
            .unwrap();

        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(&body(response).await[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_524() {
        let error = render_html(State(state().await), request("https://hang.test"))
            .await
            .unwrap_err();
        let response = error.into_response();

        assert_eq!(response.status().as_u16(), 524);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["error"]["kind"], "RENDERER_TIMEOUT");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        assert_eq!(
            RenderError::InvalidJob("bad".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RenderError::RendererCrash.into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RenderError::QueueClosed.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    /// Serve on a free local port until the returned sender fires
    async fn spawn_server() -> (
        SocketAddr,
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<(), RenderError>>,
    ) {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(state().await, addr, async move {
            let _ = stopped.await;
        }));

        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client.get(format!("http://{addr}/health")).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        (addr, stop, server)
    }

    #[tokio::test]
    async fn test_serves_over_http() {
        let (addr, stop, server) = spawn_server().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{addr}/html"))
            .json(&json!({ "url": "https://ok.test", "headers": { "X-Trace": "1" } }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.text().await.unwrap().contains("ok.test"));

        let response = client
            .post(format!("http://{addr}/png"))
            .json(&json!({ "url": "ftp://example.com" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "INVALID_JOB");

        drop(client);
        let _ = stop.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_bodies_get_json_errors() {
        let (addr, stop, server) = spawn_server().await;
        let client = reqwest::Client::new();

        let malformed = [
            ("/html", "application/json", "{}"),
            ("/png", "application/json", r#"{"url":"https://ok.test","timeout":"soon"}"#),
            ("/html", "application/json", "{not json"),
            ("/html", "text/plain", r#"{"url":"https://ok.test"}"#),
        ];

        for (path, content_type, payload) in malformed {
            let response = client
                .post(format!("http://{addr}{path}"))
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(payload)
                .send()
                .await
                .unwrap();

            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{payload}");
            assert!(response.headers()[reqwest::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("application/json"));
            let body: serde_json::Value = response.json().await.unwrap();
            assert_eq!(body["error"]["kind"], "INVALID_JOB");
            assert!(body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));
        }

        drop(client);
        let _ = stop.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_and_disabled_metrics() {
        let state = state().await;

        let response = health(State(state.clone())).await;
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["overall"], "healthy");
        assert_eq!(json["stats"]["capacity"], 1);

        assert_eq!(metrics(State(state)).await.status(), StatusCode::NOT_FOUND);
    }
}
