//! Relay transport.
//!
//! Routes the GET through a third-party URL-rewriting relay, the last
//! resort when neither native nor in-page fetch can reach the origin. The
//! relay frequently masks the origin status behind its own 200, so callers
//! must rely on the downstream shape check rather than this status.

use async_trait::async_trait;
use restyler_core::{AppConfig, Error};
use url::Url;

use super::{Transport, get_text};

/// Fetch through a URL-rewriting relay.
pub struct ProxyTransport {
    http: reqwest::Client,
    prefix: String,
}

impl ProxyTransport {
    pub fn new(config: &AppConfig, prefix: String) -> Result<Self, Error> {
        Ok(Self { http: super::build_http(config)?, prefix })
    }

    fn wrap(&self, url: &Url) -> Result<Url, Error> {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_str().as_bytes()).collect();
        Url::parse(&format!("{}{}", self.prefix, encoded))
            .map_err(|e| Error::InvalidUrl(format!("relay-wrapped URL: {e}")))
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn fetch(&self, url: &Url) -> Result<String, Error> {
        let wrapped = self.wrap(url)?;
        let body = get_text(&self.http, &wrapped).await?;
        tracing::debug!(url = %url, relay = %wrapped, bytes = body.len(), "relay fetch succeeded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_wrap_percent_encodes_target() {
        let config = AppConfig::default();
        let transport = ProxyTransport::new(&config, "https://relay.test.example/raw?url=".into()).unwrap();
        let target = Url::parse("https://cdn.test.example/a.css?v=2").unwrap();

        let wrapped = transport.wrap(&target).unwrap();
        assert_eq!(wrapped.host_str(), Some("relay.test.example"));
        assert!(wrapped.as_str().contains("url=https%3A%2F%2Fcdn.test.example%2Fa.css%3Fv%3D2"));
    }

    #[tokio::test]
    async fn test_fetch_through_relay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .and(query_param("url", "https://cdn.test.example/a.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body{color:red}"))
            .mount(&server)
            .await;

        let transport = ProxyTransport::new(&AppConfig::default(), format!("{}/raw?url=", server.uri())).unwrap();
        let target = Url::parse("https://cdn.test.example/a.css").unwrap();
        assert_eq!(transport.fetch(&target).await.unwrap(), "body{color:red}");
    }
}
