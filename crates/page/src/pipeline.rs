//! The per-profile pipeline context.
//!
//! One `StylePipeline` is constructed per active profile and owns every
//! moving part for it: the fetcher, the injector, the cache handle, and the
//! target. There is no ambient global state; the supervisor and the control
//! surface both work through this object.
//!
//! `run_once` is the top-level entry point and the error boundary: every
//! internal failure is downgraded to a logged event and a `false` return.

use std::sync::Arc;
use std::time::Duration;

use restyler_client::{FetchAttempt, StyleFetcher};
use restyler_core::{AppConfig, CacheDb, Capabilities, Readiness, SiteProfile};
use url::Url;

use crate::injector::DomInjector;
use crate::target::StyleTarget;

/// How often and how long to poll for the readiness predicate.
const READY_POLL: Duration = Duration::from_millis(250);
const READY_TRIES: u32 = 40;

/// Everything the pipeline needs for one profile.
pub struct StylePipeline<T: StyleTarget + 'static> {
    profile: SiteProfile,
    cache: CacheDb,
    fetcher: StyleFetcher,
    injector: DomInjector<T>,
    target: Arc<T>,
    cache_ttl: Duration,
}

impl<T: StyleTarget + 'static> StylePipeline<T> {
    pub fn new(
        profile: SiteProfile,
        cache: CacheDb,
        target: Arc<T>,
        fetcher: StyleFetcher,
        caps: Capabilities,
        config: &AppConfig,
    ) -> Self {
        let injector = DomInjector::new(Arc::clone(&target), caps, config);
        Self { profile, cache, fetcher, injector, target, cache_ttl: config.cache_ttl() }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    pub fn cache(&self) -> &CacheDb {
        &self.cache
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// The previous fetch cycle's attempt log.
    pub async fn last_attempts(&self) -> Vec<FetchAttempt> {
        self.fetcher.last_attempts().await
    }

    pub async fn is_applied(&self) -> bool {
        self.injector.is_applied(&self.profile).await
    }

    pub async fn remove(&self) {
        self.injector.remove(&self.profile).await;
    }

    /// Run one full fetch-and-apply cycle.
    ///
    /// Returns whether the stylesheet ended up verifiably applied. Skips
    /// work when the profile is disabled or the page never becomes ready.
    /// Never lets an error escape.
    pub async fn run_once(&self) -> bool {
        if !self.cache.is_enabled(&self.profile.name).await {
            tracing::debug!(profile = %self.profile.name, "styling disabled, skipping");
            return false;
        }

        if !self.wait_until_ready().await {
            tracing::warn!(profile = %self.profile.name, "page never became ready, skipping");
            return false;
        }

        let css = match self.fetcher.fetch_css().await {
            Ok(css) => css,
            Err(e) => {
                tracing::warn!(profile = %self.profile.name, "fetch failed: {e}");
                return false;
            }
        };

        // Provenance: the cache row the fetch just refreshed names the
        // winning source. Inline fallback content has no row.
        let source_url = self
            .cache
            .get_style(&self.profile, self.cache_ttl)
            .await
            .and_then(|cached| Url::parse(&cached.source_url).ok());

        let applied = self.injector.apply(&self.profile, &css, source_url.as_ref()).await;
        if !applied {
            self.cache
                .record_error(&self.profile.name, "injection failed: no technique verified")
                .await;
        }
        applied
    }

    async fn wait_until_ready(&self) -> bool {
        let selector = match &self.profile.readiness {
            Readiness::Always => return true,
            Readiness::Selector(selector) => selector,
        };

        for _ in 0..READY_TRIES {
            match self.target.selector_exists(selector).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(profile = %self.profile.name, "readiness probe failed: {e}");
                }
            }
            tokio::time::sleep(READY_POLL).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPage;
    use restyler_client::{DirectTransport, Transport};
    use restyler_core::profile::{InjectionPoint, Readiness};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CSS: &str = "body{color:red}";

    fn test_config() -> AppConfig {
        AppConfig {
            fetch_timeout_ms: 1_000,
            retry_passes: 0,
            proxy_prefix: None,
            verify_window_ms: 300,
            ..Default::default()
        }
    }

    fn profile_with(sources: Vec<String>, readiness: Readiness) -> SiteProfile {
        SiteProfile {
            name: "pipesite".into(),
            hosts: vec!["chat.test.example".into()],
            sources,
            artifact_id: "restyler-pipesite".into(),
            injection_point: InjectionPoint::Head,
            readiness,
            aggressive_supervision: false,
            version: 1,
            fallback_css: None,
        }
    }

    async fn pipeline_for(
        profile: SiteProfile,
        config: &AppConfig,
        page: Arc<MemoryPage>,
    ) -> StylePipeline<MemoryPage> {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let transports = vec![Box::new(DirectTransport::new(config).unwrap()) as Box<dyn Transport>];
        let fetcher = StyleFetcher::new(profile.clone(), cache.clone(), transports, config);
        StylePipeline::new(profile, cache, page, fetcher, Capabilities::default(), config)
    }

    #[tokio::test]
    async fn test_run_once_applies_with_provenance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .mount(&server)
            .await;

        let config = test_config();
        let page = Arc::new(MemoryPage::new());
        let profile = profile_with(vec![format!("{}/a.css", server.uri())], Readiness::Always);
        let pipeline = pipeline_for(profile.clone(), &config, Arc::clone(&page)).await;

        assert!(pipeline.run_once().await);
        assert!(pipeline.is_applied().await);

        let element = page.element(&profile.artifact_id).unwrap();
        assert!(element.attrs.get("data-restyler-source").unwrap().ends_with("/a.css"));
    }

    #[tokio::test]
    async fn test_run_once_404_reports_failure_without_dom_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = test_config();
        let page = Arc::new(MemoryPage::new());
        let profile = profile_with(vec![format!("{}/a.css", server.uri())], Readiness::Always);
        let pipeline = pipeline_for(profile, &config, Arc::clone(&page)).await;

        assert!(!pipeline.run_once().await);
        assert!(!pipeline.is_applied().await);
        assert_eq!(page.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_run_once_skips_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .expect(0)
            .mount(&server)
            .await;

        let config = test_config();
        let page = Arc::new(MemoryPage::new());
        let profile = profile_with(vec![format!("{}/a.css", server.uri())], Readiness::Always);
        let pipeline = pipeline_for(profile.clone(), &config, page).await;

        pipeline.cache().set_enabled(&profile.name, false).await.unwrap();
        assert!(!pipeline.run_once().await);
    }

    #[tokio::test]
    async fn test_run_once_waits_for_readiness_selector() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .mount(&server)
            .await;

        let config = test_config();
        let page = Arc::new(MemoryPage::new());
        let profile =
            profile_with(vec![format!("{}/a.css", server.uri())], Readiness::Selector("#root".into()));
        let pipeline = Arc::new(pipeline_for(profile, &config, Arc::clone(&page)).await);

        let run = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run_once().await }
        });

        // The selector shows up after a few polls; the pipeline should wait.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!run.is_finished());
        page.set_selector_present("#root", true);

        assert!(run.await.unwrap());
        assert!(pipeline.is_applied().await);
    }

    #[tokio::test]
    async fn test_fallback_applies_inline_without_remote_provenance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = test_config();
        let page = Arc::new(MemoryPage::new());
        let mut profile = profile_with(vec![format!("{}/a.css", server.uri())], Readiness::Always);
        profile.fallback_css = Some("body{color-scheme:dark}".into());
        let pipeline = pipeline_for(profile.clone(), &config, Arc::clone(&page)).await;

        assert!(pipeline.run_once().await);
        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.attrs.get("data-restyler-source").unwrap(), "inline");
        assert_eq!(element.sheet.as_deref(), Some("body{color-scheme:dark}"));
    }
}
