use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

/// Timeout applied to every sensor request.
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Flat `key → value` object as returned by a sensor board.
pub type RawReading = Map<String, Value>;

/// Fetches one reading from a sensor endpoint.
///
/// Every failure collapses to `None`; nothing is retried here.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<RawReading>;
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    http: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self> {
        Self::with_timeout(SOURCE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build sensor HTTP client")?;
        Ok(Self { http })
    }

    async fn try_fetch(&self, url: &str) -> Result<RawReading> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .context("sensor request failed")?
            .error_for_status()
            .context("sensor returned error status")?
            .bytes()
            .await
            .context("Failed to read sensor response body")?;

        serde_json::from_slice::<RawReading>(&bytes).context("sensor body is not a JSON object")
    }
}

#[async_trait]
impl ReadingSource for HttpSource {
    async fn fetch(&self, url: &str) -> Option<RawReading> {
        match self.try_fetch(url).await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!(url = %url, error = %format!("{e:#}"), "Sensor fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    use super::*;

    async fn spawn_board() -> String {
        let app = Router::new()
            .route(
                "/ok",
                get(|| async { axum::Json(serde_json::json!({ "Temperature": 22.5, "Lux": 300 })) }),
            )
            .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/garbage", get(|| async { "<html>not json</html>" }))
            .route("/array", get(|| async { axum::Json(serde_json::json!([1, 2, 3])) }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    axum::Json(serde_json::json!({ "Temperature": 22.5 }))
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn success_returns_body() {
        let base = spawn_board().await;
        let source = HttpSource::new().unwrap();

        let body = source.fetch(&format!("{base}/ok")).await.unwrap();
        assert_eq!(body["Temperature"], 22.5);
        assert_eq!(body["Lux"], 300);
    }

    #[tokio::test]
    async fn error_status_returns_none() {
        let base = spawn_board().await;
        let source = HttpSource::new().unwrap();
        assert!(source.fetch(&format!("{base}/fail")).await.is_none());
    }

    #[tokio::test]
    async fn malformed_body_returns_none() {
        let base = spawn_board().await;
        let source = HttpSource::new().unwrap();
        assert!(source.fetch(&format!("{base}/garbage")).await.is_none());
        assert!(source.fetch(&format!("{base}/array")).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpSource::new().unwrap();
        assert!(source.fetch(&format!("http://{addr}/")).await.is_none());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out_to_none() {
        let base = spawn_board().await;
        let source = HttpSource::with_timeout(Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        assert!(source.fetch(&format!("{base}/slow")).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
