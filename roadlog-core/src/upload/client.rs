//! HTTP transport for session uploads
//!
//! Posts the serialized session batch as one JSON request to
//! `base_url + endpoint`.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};

use crate::config::UploadConfig;
use crate::error::{Error, Result};

use super::UploadTransport;

/// reqwest-backed [`UploadTransport`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &UploadConfig) -> Result<Self> {
        config.validate()?;

        let url = config
            .url()
            .ok_or_else(|| Error::Config("upload.base_url is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl UploadTransport for HttpTransport {
    fn send(&self, body: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        async move {
            let response = self
                .http_client
                .post(&self.url)
                .body(body)
                .send()
                .await
                .map_err(|e| Error::Upload(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!(url = %self.url, %status, "Upload accepted");
                Ok(())
            } else {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(Error::Upload(format!(
                    "server error ({}): {}",
                    status, error_text
                )))
            }
        }
    }
}
