//! Pool web UI client
//!
//! Fetches the statistics, workers and landing-page endpoints the pool
//! serves over plain HTTP, checking status and content type before any body
//! is handed back.

use crate::{ConnectionEndpoint, Error, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, ClientBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const HTML_CONTENT_TYPE: &str = "text/html";

/// Cookie name that scopes `/stats` to one wallet address
pub const WALLET_COOKIE: &str = "wa";

/// HTTP client for the pool web UI
#[derive(Debug, Clone)]
pub struct WebUiClient {
    client: Client,
    base_url: Url,
}

impl WebUiClient {
    /// Create a new web UI client
    pub fn new(endpoint: &ConnectionEndpoint, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&endpoint.http_base())
            .map_err(|e| Error::config(format!("Invalid web UI URL: {}", e)))?;

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self { client, base_url })
    }

    /// Create a client against an explicit base URL
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid web UI URL: {}", e)))?;
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /stats`, optionally scoped to one wallet through the `wa` cookie
    #[instrument(skip(self, wallet), fields(scoped = wallet.is_some()))]
    pub async fn get_stats(&self, wallet: Option<&str>) -> Result<Value> {
        let response = self.get("stats", wallet).await?;
        expect_content_type(&response, JSON_CONTENT_TYPE)?;
        read_json(response, "/stats").await
    }

    /// `GET /workers`, which must be a JSON array
    #[instrument(skip(self))]
    pub async fn get_workers(&self) -> Result<Vec<Value>> {
        let response = self.get("workers", None).await?;
        expect_content_type(&response, JSON_CONTENT_TYPE)?;
        match read_json(response, "/workers").await? {
            Value::Array(items) => Ok(items),
            other => Err(Error::schema(
                "$",
                "list",
                crate::schema::describe(&other),
            )),
        }
    }

    /// `GET /`, the HTML landing page
    #[instrument(skip(self))]
    pub async fn get_pool_page(&self) -> Result<String> {
        let response = self.get("", None).await?;
        expect_content_type(&response, HTML_CONTENT_TYPE)?;
        response
            .text()
            .await
            .map_err(|e| Error::from_http("reading landing page", e))
    }

    async fn get(&self, path: &str, wallet: Option<&str>) -> Result<Response> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| Error::config(format!("Failed to build /{} URL: {}", path, e)))?;

        debug!("GET {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(address) = wallet {
            request = request.header(COOKIE, format!("{}={}", WALLET_COOKIE, address));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_http(&format!("GET {}", url), e))?;

        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "GET {}: HTTP {}",
                url,
                response.status()
            )));
        }

        Ok(response)
    }
}

/// Require the response's media type to be `expected`, ignoring parameters
pub fn expect_content_type(response: &Response, expected: &str) -> Result<()> {
    let header = response
        .headers()
        .get(CONTENT_TYPE)
        .ok_or_else(|| {
            Error::transport(format!("{}: no content-type, expected {}", response.url(), expected))
        })?
        .to_str()
        .map_err(|_| Error::transport(format!("{}: content-type is not ASCII", response.url())))?;

    if media_type(header).eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::transport(format!(
            "{}: content-type is {:?}, expected {:?}",
            response.url(),
            header,
            expected
        )))
    }
}

fn media_type(header: &str) -> &str {
    header.split(';').next().unwrap_or_default().trim()
}

async fn read_json(response: Response, what: &str) -> Result<Value> {
    let body = response
        .text()
        .await
        .map_err(|e| Error::from_http(&format!("reading {}", what), e))?;
    serde_json::from_str(&body)
        .map_err(|e| Error::transport(format!("{} body is not JSON ({}): {:?}", what, e, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> WebUiClient {
        WebUiClient::with_base_url(&format!("{}/", server.url()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type("application/json"), "application/json");
        assert_eq!(media_type("text/html; charset=utf-8"), "text/html");
        assert_eq!(media_type(""), "");
    }

    #[test]
    fn test_client_creation() {
        let endpoint = ConnectionEndpoint::new("127.0.0.1", 4243).unwrap();
        let client = WebUiClient::new(&endpoint, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:4243/");
    }

    #[tokio::test]
    async fn test_stats_with_wallet_cookie() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/stats")
            .match_header("cookie", Matcher::Exact("wa=44wallet".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pool_blocks_found": 3}"#)
            .create_async()
            .await;

        let stats = client_for(&server).get_stats(Some("44wallet")).await.unwrap();
        assert_eq!(stats["pool_blocks_found"], json!(3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stats_wrong_content_type() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stats")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("{}")
            .create_async()
            .await;

        let err = client_for(&server).get_stats(None).await.unwrap_err();
        assert_matches!(err, Error::Transport { .. });
    }

    #[tokio::test]
    async fn test_stats_server_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stats")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server).get_stats(None).await.unwrap_err();
        assert_matches!(err, Error::Transport { ref message } if message.contains("503"));
    }

    #[tokio::test]
    async fn test_stats_not_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stats")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("<html>")
            .create_async()
            .await;

        let err = client_for(&server).get_stats(None).await.unwrap_err();
        assert_matches!(err, Error::Transport { .. });
    }

    #[tokio::test]
    async fn test_workers_must_be_array() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/workers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        assert!(client_for(&server).get_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workers_object_rejected() {
        let mut server = Server::new_async().await;
        let _object = server
            .mock("GET", "/workers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let err = client_for(&server).get_workers().await.unwrap_err();
        assert_matches!(err, Error::SchemaViolation { .. });
    }

    #[tokio::test]
    async fn test_pool_page_html() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>pool</body></html>")
            .create_async()
            .await;

        let page = client_for(&server).get_pool_page().await.unwrap();
        assert!(page.contains("pool"));
    }
}
