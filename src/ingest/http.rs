// src/ingest/http.rs
use metrics::counter;
use reqwest::Client;
use std::time::Duration;

use crate::config::HttpSettings;
use crate::error::{IngestError, IngestResult};

/// One planned upstream GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Shared upstream client: bounded timeout, small fixed retry budget on
/// transport failures and 5xx answers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff: Duration,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> IngestResult<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| IngestError::config(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.retries,
            backoff: Duration::from_millis(settings.backoff_ms),
        })
    }

    pub async fn get_text(&self, url: &str) -> IngestResult<String> {
        self.fetch(&HttpRequest::get(url)).await
    }

    pub async fn fetch(&self, req: &HttpRequest) -> IngestResult<String> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            counter!("ingest_http_requests_total").increment(1);

            let mut builder = self.client.get(&req.url).timeout(self.timeout);
            if !req.query.is_empty() {
                builder = builder.query(&req.query);
            }
            for (k, v) in &req.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }

            let retryable = match builder.send().await {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return rsp.text().await.map_err(|e| IngestError::Http {
                            url: req.url.clone(),
                            message: format!("reading body: {e}"),
                        });
                    }
                    let err = IngestError::Status {
                        url: req.url.clone(),
                        status: status.as_u16(),
                    };
                    if !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => IngestError::Http {
                    url: req.url.clone(),
                    message: e.to_string(),
                },
            };

            if attempt > self.max_retries {
                return Err(retryable);
            }
            tracing::debug!(
                target: "ingest",
                url = %req.url,
                attempt,
                error = %retryable,
                "retrying upstream request"
            );
            counter!("ingest_http_retries_total").increment(1);
            tokio::time::sleep(self.backoff * (1u32 << (attempt - 1).min(4))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        let settings = HttpSettings {
            retries: 2,
            backoff_ms: 1,
            ..HttpSettings::default()
        };
        HttpClient::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn retries_5xx_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/feed")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = client()
            .get_text(&format!("{}/feed", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.class(), "HttpStatusError");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = client()
            .get_text(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Status { status: 404, .. }));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn sends_query_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api")
            .match_query(mockito::Matcher::UrlEncoded("year".into(), "2026".into()))
            .match_header("x-api-key", "secret")
            .with_body("ok")
            .create_async()
            .await;

        let req = HttpRequest::get(format!("{}/api", server.url()))
            .with_query("year", "2026")
            .with_header("x-api-key", "secret");
        assert_eq!(client().fetch(&req).await.unwrap(), "ok");
        m.assert_async().await;
    }
}
