//! Native HTTP transport.
//!
//! Issues the GET from this process with full cross-origin freedom. Only
//! assembled when the capability descriptor grants privileged transport.

use async_trait::async_trait;
use restyler_core::{AppConfig, Error};
use url::Url;

use super::{Transport, get_text};

/// Privileged native fetch via reqwest.
pub struct DirectTransport {
    http: reqwest::Client,
}

impl DirectTransport {
    pub fn new(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self { http: super::build_http(config)? })
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, url: &Url) -> Result<String, Error> {
        let body = get_text(&self.http, url).await?;
        tracing::debug!(url = %url, bytes = body.len(), "direct fetch succeeded");
        Ok(body)
    }
}
