//! The retrieval protocol: cache check, source x transport matrix walk,
//! shape validation, cache store.
//!
//! One fetch cycle attempts every candidate URL against every transport in
//! a fixed preference order, first success wins. Transport-level failures
//! are per-attempt events recorded for diagnostics; only exhaustion of the
//! whole matrix across all retry passes surfaces, and even that is absorbed
//! when the profile ships inline fallback styling.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use restyler_core::{AppConfig, CacheDb, Error, SiteProfile};
use tokio::sync::Mutex;
use url::Url;

use crate::sources::SourceList;
use crate::transport::Transport;
use crate::validate::validate_stylesheet;

/// One attempt in a fetch cycle, kept for diagnostics and promotion.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub at: DateTime<Utc>,
    pub source: String,
    pub transport: &'static str,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Executes the retrieval protocol for one profile.
pub struct StyleFetcher {
    profile: SiteProfile,
    cache: CacheDb,
    transports: Vec<Box<dyn Transport>>,
    sources: Mutex<SourceList>,
    attempts: Mutex<Vec<FetchAttempt>>,
    in_flight: Mutex<()>,
    cache_ttl: Duration,
    retry_passes: u32,
    retry_backoff: Duration,
}

impl StyleFetcher {
    pub fn new(
        profile: SiteProfile,
        cache: CacheDb,
        transports: Vec<Box<dyn Transport>>,
        config: &AppConfig,
    ) -> Self {
        let sources = Mutex::new(SourceList::for_profile(&profile));
        Self {
            profile,
            cache,
            transports,
            sources,
            attempts: Mutex::new(Vec::new()),
            in_flight: Mutex::new(()),
            cache_ttl: config.cache_ttl(),
            retry_passes: config.retry_passes,
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// The previous cycle's attempt log, for the diagnostics view.
    pub async fn last_attempts(&self) -> Vec<FetchAttempt> {
        self.attempts.lock().await.clone()
    }

    /// Retrieve the stylesheet for this profile.
    ///
    /// Cache hit is the only fast path. On a miss, walks the source x
    /// transport matrix in order with bounded per-attempt time, retries the
    /// whole matrix up to the configured extra passes with linear backoff,
    /// then falls back to the profile's inline CSS if it has one.
    ///
    /// Concurrent calls block and wait: the in-flight lock admits one
    /// matrix walk at a time, and late callers re-check the cache the
    /// winner just filled instead of launching their own walk.
    pub async fn fetch_css(&self) -> Result<String, Error> {
        if let Some(hit) = self.lookup_cache().await {
            return Ok(hit);
        }

        let _walk = self.in_flight.lock().await;

        if let Some(hit) = self.lookup_cache().await {
            return Ok(hit);
        }

        self.attempts.lock().await.clear();

        let candidates = self.sources.lock().await.candidates();
        let total_passes = self.retry_passes + 1;
        let mut attempts_made = 0usize;

        for pass in 0..total_passes {
            if pass > 0 {
                let backoff = self.retry_backoff * pass;
                tracing::debug!(profile = %self.profile.name, pass, "matrix exhausted, backing off {backoff:?}");
                tokio::time::sleep(backoff).await;
            }

            for url in &candidates {
                for transport in &self.transports {
                    attempts_made += 1;
                    match self.attempt(url, transport.as_ref()).await {
                        Ok(css) => {
                            if !self.cache.put_style(&self.profile, &css, url.as_str()).await {
                                tracing::warn!(profile = %self.profile.name, "cache store failed, proceeding without cache");
                            }
                            self.sources.lock().await.promote(url);
                            return Ok(css);
                        }
                        Err(e) => {
                            tracing::debug!(
                                profile = %self.profile.name,
                                source = %url,
                                transport = transport.name(),
                                "attempt failed: {e}"
                            );
                        }
                    }
                }
            }
        }

        if let Some(fallback) = &self.profile.fallback_css {
            tracing::warn!(
                profile = %self.profile.name,
                attempts = attempts_made,
                "all sources exhausted, degrading to inline fallback styling"
            );
            return Ok(fallback.clone());
        }

        let err = Error::FetchExhausted { attempts: attempts_made, passes: total_passes };
        self.cache.record_error(&self.profile.name, &err.to_string()).await;
        Err(err)
    }

    async fn lookup_cache(&self) -> Option<String> {
        let hit = self.cache.get_style(&self.profile, self.cache_ttl).await?;
        tracing::debug!(profile = %self.profile.name, source = %hit.source_url, "cache hit");
        if let Ok(url) = Url::parse(&hit.source_url) {
            self.sources.lock().await.promote(&url);
        }
        Some(hit.css)
    }

    async fn attempt(&self, url: &Url, transport: &dyn Transport) -> Result<String, Error> {
        let start = Instant::now();

        let result = match transport.fetch(url).await {
            Ok(body) => validate_stylesheet(&body)
                .map(|css| css.to_string())
                .map_err(|e| Error::ContentInvalid(e.to_string())),
            Err(e) => Err(e),
        };

        let record = FetchAttempt {
            at: Utc::now(),
            source: url.as_str().to_string(),
            transport: transport.name(),
            success: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.attempts.lock().await.push(record);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DirectTransport, TransportSet};
    use restyler_core::profile::{InjectionPoint, Readiness};
    use restyler_core::Capabilities;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CSS: &str = "body{color:red}";

    fn test_config() -> AppConfig {
        AppConfig { fetch_timeout_ms: 1_000, retry_passes: 0, proxy_prefix: None, ..Default::default() }
    }

    fn profile_with(sources: Vec<String>, fallback: Option<String>) -> SiteProfile {
        SiteProfile {
            name: "fetchsite".into(),
            hosts: vec!["chat.test.example".into()],
            sources,
            artifact_id: "restyler-fetchsite".into(),
            injection_point: InjectionPoint::Head,
            readiness: Readiness::Always,
            aggressive_supervision: false,
            version: 1,
            fallback_css: fallback,
        }
    }

    async fn fetcher_for(profile: SiteProfile, config: &AppConfig) -> StyleFetcher {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let transports = vec![Box::new(DirectTransport::new(config).unwrap()) as Box<dyn Transport>];
        StyleFetcher::new(profile, cache, transports, config)
    }

    #[tokio::test]
    async fn test_second_url_wins_after_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.css"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .mount(&server)
            .await;

        let config = AppConfig { fetch_timeout_ms: 1_000, ..test_config() };
        let profile = profile_with(
            vec![format!("{}/a.css", server.uri()), format!("{}/b.css", server.uri())],
            None,
        );
        let fetcher = fetcher_for(profile.clone(), &config).await;

        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);

        // The cache is keyed to the URL that actually produced the content.
        let cached = fetcher.cache.get_style(&profile, config.cache_ttl()).await.unwrap();
        assert_eq!(cached.css, CSS);
        assert!(cached.source_url.ends_with("/b.css"));

        let attempts = fetcher.last_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert!(attempts[0].error.as_deref().unwrap().contains("FETCH_TIMEOUT"));
        assert!(attempts[1].success);
    }

    #[tokio::test]
    async fn test_single_404_exhausts_without_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(vec![format!("{}/only.css", server.uri())], None);
        let fetcher = fetcher_for(profile.clone(), &config).await;

        let err = fetcher.fetch_css().await.unwrap_err();
        assert!(matches!(err, Error::FetchExhausted { attempts: 1, passes: 1 }));

        // Nothing cached, and the failure landed in the diagnostic log.
        assert!(fetcher.cache.get_style(&profile, config.cache_ttl()).await.is_none());
        let errors = fetcher.cache.recent_errors(5).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("FETCH_EXHAUSTED"));
    }

    #[tokio::test]
    async fn test_exhaustion_degrades_to_inline_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(
            vec![format!("{}/down.css", server.uri())],
            Some("body{color-scheme:dark}".into()),
        );
        let fetcher = fetcher_for(profile.clone(), &config).await;

        assert_eq!(fetcher.fetch_css().await.unwrap(), "body{color-scheme:dark}");
        // Deliberate degradation, not a fetched artifact: never cached.
        assert!(fetcher.cache.get_style(&profile, config.cache_ttl()).await.is_none());
    }

    #[tokio::test]
    async fn test_html_error_page_is_rejected_and_next_source_tried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/masked.css"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html>origin exploded</html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/real.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(
            vec![format!("{}/masked.css", server.uri()), format!("{}/real.css", server.uri())],
            None,
        );
        let fetcher = fetcher_for(profile, &config).await;

        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);
        let attempts = fetcher.last_attempts().await;
        assert!(attempts[0].error.as_deref().unwrap().contains("CONTENT_INVALID"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(vec![format!("{}/once.css", server.uri())], None);
        let fetcher = fetcher_for(profile, &config).await;

        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);
        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);
        // MockServer verifies the expect(1) on drop.
    }

    #[tokio::test]
    async fn test_promoted_source_tried_first_next_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/first.css"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/second.css"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/third.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .expect(2)
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(
            vec![
                format!("{}/first.css", server.uri()),
                format!("{}/second.css", server.uri()),
                format!("{}/third.css", server.uri()),
            ],
            None,
        );
        let fetcher = fetcher_for(profile, &config).await;

        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);

        // Clear the cache so the next cycle walks the matrix again; the
        // promoted third URL must now be attempted first, which the expect
        // counts on the failing mocks verify.
        fetcher.cache.clear_styles(None).await.unwrap();
        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_matrix_walk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(CSS)
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let profile = profile_with(vec![format!("{}/shared.css", server.uri())], None);
        let fetcher = Arc::new(fetcher_for(profile, &config).await);

        let a = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch_css().await }
        });
        let b = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.fetch_css().await }
        });

        assert_eq!(a.await.unwrap().unwrap(), CSS);
        assert_eq!(b.await.unwrap().unwrap(), CSS);
        // expect(1): the waiter was satisfied from cache, not a second walk.
    }

    #[tokio::test]
    async fn test_retry_pass_repeats_matrix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let config = AppConfig { retry_passes: 1, retry_backoff_ms: 10, ..test_config() };
        let profile = profile_with(vec![format!("{}/flaky.css", server.uri())], None);
        let fetcher = fetcher_for(profile, &config).await;

        let err = fetcher.fetch_css().await.unwrap_err();
        assert!(matches!(err, Error::FetchExhausted { attempts: 2, passes: 2 }));
    }

    #[tokio::test]
    async fn test_transport_set_matrix_order() {
        // Direct fails with 500, relay succeeds: the walk must fall through
        // to the relay within the same candidate.
        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.css"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&origin)
            .await;
        let relay = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CSS))
            .mount(&relay)
            .await;

        let config = AppConfig {
            proxy_prefix: Some(format!("{}/raw?url=", relay.uri())),
            ..test_config()
        };
        let profile = profile_with(vec![format!("{}/a.css", origin.uri())], None);

        let cache = CacheDb::open_in_memory().await.unwrap();
        let transports = TransportSet::assemble(Capabilities::default(), &config, None).unwrap();
        let fetcher = StyleFetcher::new(profile, cache, transports, &config);

        assert_eq!(fetcher.fetch_css().await.unwrap(), CSS);
        let attempts = fetcher.last_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].transport, "direct");
        assert_eq!(attempts[1].transport, "proxy");
    }
}
