//! Live-page target over the Chrome DevTools Protocol.
//!
//! Attaches to an already-running browser through its DevTools websocket
//! and drives one page with small script evaluations. Also contributes the
//! in-page fetch transport: a request executed inside the page itself, with
//! the page's cookies and origin, which reaches origins the native client
//! cannot when the host environment withholds privileged transport.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use futures_util::StreamExt;
use restyler_core::{Error, InjectionPoint};
use url::Url;

pub use chromiumoxide::Browser;

use crate::target::{ArtifactSpec, StyleTarget};
use restyler_client::Transport;

/// Poll step while waiting on the page's mutation flag.
const MUTATION_STEP: Duration = Duration::from_millis(100);

/// Installs a page-wide mutation observer on first use, then reads and
/// clears the dirty flag it maintains.
const MUTATION_PROBE: &str = r#"(() => {
  if (!window.__restylerObserver) {
    window.__restylerDirty = false;
    new MutationObserver(() => { window.__restylerDirty = true; })
      .observe(document.documentElement, { childList: true, subtree: true });
    window.__restylerObserver = true;
  }
  const dirty = window.__restylerDirty;
  window.__restylerDirty = false;
  return dirty;
})()"#;

/// Quote a string for embedding in a script.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

/// A real page driven over CDP.
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    /// Connect to a running browser's DevTools websocket and adopt a page.
    ///
    /// With `wanted_hosts` set, the first page whose URL host matches one of
    /// them is adopted; otherwise the first page wins. The returned
    /// `Browser` must be kept alive for as long as the page is driven.
    pub async fn attach(ws_url: &str, wanted_hosts: Option<&[String]>) -> Result<(Browser, Self), Error> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| Error::Target(format!("CDP connect failed: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                    break;
                }
            }
        });

        let pages = browser
            .pages()
            .await
            .map_err(|e| Error::Target(format!("page listing failed: {e}")))?;

        for page in pages {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            let host = Url::parse(&url).ok().and_then(|u| u.host_str().map(|h| h.to_string()));

            let matches = match (wanted_hosts, &host) {
                (None, _) => true,
                (Some(hosts), Some(page_host)) => hosts
                    .iter()
                    .any(|h| page_host == h || page_host.ends_with(&format!(".{h}"))),
                (Some(_), None) => false,
            };

            if matches {
                tracing::info!(url = %url, "adopted page");
                return Ok((browser, Self { page }));
            }
        }

        Err(Error::Target("no page matched the wanted hosts".into()))
    }

    /// The in-page fetch transport for this page.
    pub fn in_page_transport(&self, timeout: Duration) -> InPageTransport {
        InPageTransport { page: self.page.clone(), timeout }
    }

    async fn eval_bool(&self, js: String) -> Result<bool, Error> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| Error::Target(e.to_string()))?;
        result.into_value::<bool>().map_err(|e| Error::Target(e.to_string()))
    }

    fn point_expr(point: InjectionPoint) -> &'static str {
        match point {
            InjectionPoint::Head => "document.head",
            InjectionPoint::Body => "document.body",
        }
    }

    fn element_setup(spec: &ArtifactSpec) -> String {
        format!(
            "el.id = {id};\n  el.setAttribute('data-restyler-source', {source});\n  \
             el.setAttribute('data-restyler-technique', {technique});",
            id = js_str(&spec.id),
            source = js_str(&spec.source),
            technique = js_str(spec.technique),
        )
    }
}

#[async_trait]
impl StyleTarget for CdpPage {
    async fn selector_exists(&self, selector: &str) -> Result<bool, Error> {
        self.eval_bool(format!(
            "(() => {{ try {{ return document.querySelector({}) !== null; }} catch (e) {{ return false; }} }})()",
            js_str(selector)
        ))
        .await
    }

    async fn insert_style(&self, spec: &ArtifactSpec, css: &str) -> Result<(), Error> {
        let js = format!(
            "(() => {{\n  const el = document.createElement('style');\n  {setup}\n  \
             el.textContent = {css};\n  \
             const parent = {point} || document.documentElement;\n  \
             if (!parent) return false;\n  parent.appendChild(el);\n  return true;\n}})()",
            setup = Self::element_setup(spec),
            css = js_str(css),
            point = Self::point_expr(spec.point),
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(Error::Target("no attachment point in document".into()))
        }
    }

    async fn insert_link(&self, spec: &ArtifactSpec, href: &Url) -> Result<(), Error> {
        let js = format!(
            "(() => {{\n  const el = document.createElement('link');\n  {setup}\n  \
             el.rel = 'stylesheet';\n  el.href = {href};\n  \
             const parent = {point} || document.documentElement;\n  \
             if (!parent) return false;\n  parent.appendChild(el);\n  return true;\n}})()",
            setup = Self::element_setup(spec),
            href = js_str(href.as_str()),
            point = Self::point_expr(spec.point),
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(Error::Target("no attachment point in document".into()))
        }
    }

    async fn create_local_url(&self, css: &str) -> Result<Url, Error> {
        let js = format!(
            "URL.createObjectURL(new Blob([{}], {{ type: 'text/css' }}))",
            js_str(css)
        );
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| Error::Target(e.to_string()))?;
        let blob_url: String = result.into_value().map_err(|e| Error::Target(e.to_string()))?;
        Url::parse(&blob_url).map_err(|e| Error::Target(format!("unparseable object URL: {e}")))
    }

    async fn release_local_url(&self, url: &Url) {
        let js = format!("URL.revokeObjectURL({})", js_str(url.as_str()));
        if let Err(e) = self.page.evaluate(js).await {
            tracing::debug!("object URL revoke failed: {e}");
        }
    }

    async fn remove_element(&self, id: &str) -> Result<bool, Error> {
        self.eval_bool(format!(
            "(() => {{ const el = document.getElementById({}); if (!el) return false; el.remove(); return true; }})()",
            js_str(id)
        ))
        .await
    }

    async fn element_present(&self, id: &str) -> Result<bool, Error> {
        self.eval_bool(format!("document.getElementById({}) !== null", js_str(id)))
            .await
    }

    async fn stylesheet_active(&self, id: &str) -> Result<bool, Error> {
        // Cross-origin sheets hide their rules; reaching the catch arm
        // still means the sheet loaded.
        self.eval_bool(format!(
            "(() => {{\n  const el = document.getElementById({});\n  \
             if (!el || !el.sheet) return false;\n  \
             try {{ return el.sheet.cssRules.length > 0; }} catch (e) {{ return true; }}\n}})()",
            js_str(id)
        ))
        .await
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn is_visible(&self) -> bool {
        self.eval_bool("document.visibilityState === 'visible'".to_string())
            .await
            .unwrap_or(true)
    }

    async fn wait_for_mutation(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.eval_bool(MUTATION_PROBE.to_string()).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::debug!("mutation probe failed: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(MUTATION_STEP).await;
        }
    }
}

/// A fetch executed inside the adopted page.
pub struct InPageTransport {
    page: Page,
    timeout: Duration,
}

#[async_trait]
impl Transport for InPageTransport {
    fn name(&self) -> &'static str {
        "in-page"
    }

    async fn fetch(&self, url: &Url) -> Result<String, Error> {
        let js = format!(
            "fetch({}, {{ credentials: 'omit', cache: 'no-store' }}).then(r => {{ \
             if (!r.ok) throw new Error('status ' + r.status); return r.text(); }})",
            js_str(url.as_str())
        );

        let params = EvaluateParams::builder()
            .expression(js)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(Error::Target)?;

        let evaluation = match tokio::time::timeout(self.timeout, self.page.evaluate(params)).await {
            Err(_) => return Err(Error::Timeout(format!("in-page fetch of {url}"))),
            Ok(Err(e)) => return Err(Error::Network(format!("in-page fetch failed: {e}"))),
            Ok(Ok(evaluation)) => evaluation,
        };

        let body: String = evaluation
            .into_value()
            .map_err(|e| Error::Network(format!("in-page fetch returned no body: {e}")))?;
        tracing::debug!(url = %url, bytes = body.len(), "in-page fetch succeeded");
        Ok(body)
    }
}
