//! Shared HTTP client for location and weather providers.

use std::time::Duration;

use nimbus_core::WeatherConfig;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::SourceError;
use crate::retry::{with_retry, RetryConfig};

/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryConfig,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration, retry: RetryConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client, retry })
    }

    pub fn from_config(config: &WeatherConfig) -> Result<Self, SourceError> {
        Self::new(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
            RetryConfig::default().with_max_retries(config.max_retries),
        )
    }

    /// GET with retries, returning the raw response whatever its status.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response, SourceError> {
        let response = with_retry(&self.retry, || self.client.get(url).query(query).send()).await?;
        Ok(response)
    }

    /// GET with retries and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self.get(url, query).await?;
        handle_response(response).await
    }
}

/// Decode a successful response, or map the failure status.
pub async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&text).map_err(|e| {
            tracing::debug!("Unexpected payload: {}", truncate(&text, 200));
            SourceError::Parse(e.to_string())
        });
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SourceError::Unauthorized(format!("{}: {}", status, truncate(&text, 200))))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::ApiLimit(truncate(&text, 200).to_string())),
        _ => Err(SourceError::Status {
            status: status.as_u16(),
            message: truncate(&text, 200).to_string(),
        }),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Echo {
        value: i32,
    }

    fn client() -> HttpClient {
        HttpClient::new("nimbus-test", Duration::from_secs(5), RetryConfig::none()).unwrap()
    }

    #[tokio::test]
    async fn test_get_json_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/echo"))
            .and(query_param("q", "berlin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 7})))
            .mount(&server)
            .await;

        let echo: Echo = client()
            .get_json(&format!("{}/echo", server.uri()), &[("q", "berlin".to_string())])
            .await
            .unwrap();
        assert_eq!(echo.value, 7);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
            .mount(&server)
            .await;
        Mock::given(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let http = client();
        let denied = http.get_json::<Echo>(&format!("{}/denied", server.uri()), &[]).await;
        assert!(matches!(denied, Err(SourceError::Unauthorized(_))));
        let limited = http.get_json::<Echo>(&format!("{}/limited", server.uri()), &[]).await;
        assert!(matches!(limited, Err(SourceError::ApiLimit(_))));
        let garbage = http.get_json::<Echo>(&format!("{}/garbage", server.uri()), &[]).await;
        assert!(matches!(garbage, Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("北京市", 2), "北京");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
