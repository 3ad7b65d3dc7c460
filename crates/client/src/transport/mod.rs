//! Retrieval transports.
//!
//! A transport is one mechanism for issuing the GET for a candidate URL.
//! The preference order is fixed data, assembled once from the capability
//! descriptor: privileged native HTTP first (when the host grants it), then
//! whatever in-page transport the style target contributes, then the
//! URL-rewriting relay as the last resort. Adding a transport is a data
//! change in `TransportSet::assemble`, not new control flow in the fetcher.

mod direct;
mod proxy;

pub use direct::DirectTransport;
pub use proxy::ProxyTransport;

use async_trait::async_trait;
use restyler_core::{AppConfig, Capabilities, Error};
use url::Url;

/// One mechanism for issuing a network request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name recorded in attempt logs and provenance attributes.
    fn name(&self) -> &'static str;

    /// Retrieve the body at `url`. Implementations bound their own time and
    /// classify failures into the transport error variants.
    async fn fetch(&self, url: &Url) -> Result<String, Error>;
}

/// Assembles the transport preference order.
pub struct TransportSet;

impl TransportSet {
    /// Build the ordered transports for one pipeline.
    ///
    /// `in_page` is the optional transport contributed by a live style
    /// target (a fetch executed inside the page itself).
    pub fn assemble(
        caps: Capabilities,
        config: &AppConfig,
        in_page: Option<Box<dyn Transport>>,
    ) -> Result<Vec<Box<dyn Transport>>, Error> {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();

        if caps.privileged_transport {
            transports.push(Box::new(DirectTransport::new(config)?));
        }

        if let Some(transport) = in_page {
            transports.push(transport);
        }

        if let Some(prefix) = &config.proxy_prefix {
            transports.push(Box::new(ProxyTransport::new(config, prefix.clone())?));
        }

        Ok(transports)
    }
}

/// Map a reqwest failure onto the transport error taxonomy.
pub(crate) fn classify(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

/// Build the shared HTTP client the way every transport needs it.
pub(crate) fn build_http(config: &AppConfig) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.fetch_timeout())
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .use_rustls_tls()
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))
}

/// Issue the GET and hand back the decoded body.
pub(crate) async fn get_text(http: &reqwest::Client, url: &Url) -> Result<String, Error> {
    let response = http
        .get(url.as_str())
        .header("Accept", "text/css,*/*;q=0.1")
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus(status.as_u16()));
    }

    response.text().await.map_err(classify)
}
