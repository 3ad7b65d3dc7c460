//! Applies validated CSS to a style target, verifiably.
//!
//! Techniques are tried in order until one's stylesheet can be observed
//! active within the verification window: an inline style element first, a
//! local-URL-backed link second, a direct link to the remote source last.
//! At most one live artifact exists per profile; `apply` always removes the
//! previous one before injecting. Local URLs are released on removal, on
//! replacement, after failed verification, and by a delayed best-effort
//! sweep once a sheet has finished applying.

use std::sync::Arc;
use std::time::Duration;

use restyler_core::{AppConfig, Capabilities, Error, SiteProfile};
use tokio::sync::Mutex;
use url::Url;

use crate::target::{ArtifactSpec, StyleTarget};

/// Poll step inside the verification window.
const VERIFY_STEP: Duration = Duration::from_millis(50);

/// Delay before the best-effort local-URL sweep behind a verified sheet.
const RELEASE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Technique {
    InlineStyle,
    LocalUrlLink,
    RemoteLink,
}

impl Technique {
    fn name(self) -> &'static str {
        match self {
            Technique::InlineStyle => "inline-style",
            Technique::LocalUrlLink => "local-url-link",
            Technique::RemoteLink => "remote-link",
        }
    }
}

/// Owns artifact creation and destruction for one profile's target.
pub struct DomInjector<T: StyleTarget + 'static> {
    target: Arc<T>,
    caps: Capabilities,
    verify_window: Duration,
    apply_lock: Mutex<()>,
    live_local_url: Mutex<Option<Url>>,
}

impl<T: StyleTarget + 'static> DomInjector<T> {
    pub fn new(target: Arc<T>, caps: Capabilities, config: &AppConfig) -> Self {
        Self {
            target,
            caps,
            verify_window: config.verify_window(),
            apply_lock: Mutex::new(()),
            live_local_url: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Apply `css` to the target, trying techniques in order until one
    /// verifies. `source_url` names where the content came from; None means
    /// inline fallback styling, which rules out the remote-link technique.
    ///
    /// Returns whether a technique verifiably applied. Never panics or
    /// escapes with an error.
    pub async fn apply(&self, profile: &SiteProfile, css: &str, source_url: Option<&Url>) -> bool {
        let _guard = self.apply_lock.lock().await;

        // At most one live artifact: replace, never stack.
        self.remove_inner(profile).await;

        let mut techniques = vec![Technique::InlineStyle];
        if self.caps.local_urls {
            techniques.push(Technique::LocalUrlLink);
        }
        if source_url.is_some() {
            techniques.push(Technique::RemoteLink);
        }

        for technique in techniques {
            match self.try_technique(profile, technique, css, source_url).await {
                Ok(()) => {
                    tracing::info!(
                        profile = %profile.name,
                        technique = technique.name(),
                        "stylesheet applied"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::debug!(
                        profile = %profile.name,
                        technique = technique.name(),
                        "injection technique failed: {e}"
                    );
                }
            }
        }

        let err = Error::InjectionFailed("no injection technique verified".into());
        tracing::warn!(profile = %profile.name, "{err}");
        false
    }

    /// Remove the live artifact, if any. Idempotent.
    pub async fn remove(&self, profile: &SiteProfile) {
        let _guard = self.apply_lock.lock().await;
        self.remove_inner(profile).await;
    }

    /// Whether the artifact is actually present in the target right now.
    pub async fn is_applied(&self, profile: &SiteProfile) -> bool {
        self.target.element_present(&profile.artifact_id).await.unwrap_or(false)
    }

    async fn remove_inner(&self, profile: &SiteProfile) {
        match self.target.remove_element(&profile.artifact_id).await {
            Ok(true) => tracing::debug!(profile = %profile.name, "artifact removed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(profile = %profile.name, "artifact removal failed: {e}"),
        }

        if let Some(url) = self.live_local_url.lock().await.take() {
            self.target.release_local_url(&url).await;
        }
    }

    async fn try_technique(
        &self,
        profile: &SiteProfile,
        technique: Technique,
        css: &str,
        source_url: Option<&Url>,
    ) -> Result<(), Error> {
        let spec = ArtifactSpec {
            id: profile.artifact_id.clone(),
            point: profile.injection_point,
            source: source_url.map(|u| u.as_str().to_string()).unwrap_or_else(|| "inline".into()),
            technique: technique.name(),
        };

        let local_url = match technique {
            Technique::InlineStyle => {
                self.target.insert_style(&spec, css).await?;
                None
            }
            Technique::LocalUrlLink => {
                let url = self.target.create_local_url(css).await?;
                if let Err(e) = self.target.insert_link(&spec, &url).await {
                    self.target.release_local_url(&url).await;
                    return Err(e);
                }
                Some(url)
            }
            Technique::RemoteLink => {
                let href = source_url.ok_or_else(|| Error::InjectionFailed("no remote URL to link".into()))?;
                self.target.insert_link(&spec, href).await?;
                None
            }
        };

        if self.verify(&spec.id).await {
            if let Some(url) = local_url {
                *self.live_local_url.lock().await = Some(url.clone());
                self.spawn_grace_release(url);
            }
            Ok(())
        } else {
            // Unverified artifacts never linger.
            if let Err(e) = self.target.remove_element(&spec.id).await {
                tracing::warn!(profile = %profile.name, "cleanup of unverified artifact failed: {e}");
            }
            if let Some(url) = local_url {
                self.target.release_local_url(&url).await;
            }
            Err(Error::InjectionFailed(format!(
                "{} did not verify within {:?}",
                technique.name(),
                self.verify_window
            )))
        }
    }

    /// Poll for an active stylesheet within the verification window.
    async fn verify(&self, id: &str) -> bool {
        let deadline = tokio::time::Instant::now() + self.verify_window;
        loop {
            if self.target.stylesheet_active(id).await.unwrap_or(false) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(VERIFY_STEP).await;
        }
    }

    /// Once a sheet has applied, its backing URL is no longer needed; sweep
    /// it after a grace period even if nobody calls `remove`.
    fn spawn_grace_release(&self, url: Url) {
        let target = Arc::clone(&self.target);
        tokio::spawn(async move {
            tokio::time::sleep(RELEASE_GRACE).await;
            target.release_local_url(&url).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ElementKind, MemoryPage};
    use restyler_core::profile::{InjectionPoint, Readiness};

    fn test_profile() -> SiteProfile {
        SiteProfile {
            name: "injectsite".into(),
            hosts: vec!["chat.test.example".into()],
            sources: vec!["https://cdn.test.example/a.css".into()],
            artifact_id: "restyler-injectsite".into(),
            injection_point: InjectionPoint::Head,
            readiness: Readiness::Always,
            aggressive_supervision: false,
            version: 1,
            fallback_css: None,
        }
    }

    fn injector(page: &Arc<MemoryPage>) -> DomInjector<MemoryPage> {
        let config = AppConfig { verify_window_ms: 300, ..Default::default() };
        DomInjector::new(Arc::clone(page), Capabilities::default(), &config)
    }

    const CSS: &str = "body{color:red}";

    #[tokio::test]
    async fn test_apply_then_is_applied_then_remove() {
        let page = Arc::new(MemoryPage::new());
        let injector = injector(&page);
        let profile = test_profile();

        assert!(injector.apply(&profile, CSS, None).await);
        assert!(injector.is_applied(&profile).await);

        injector.remove(&profile).await;
        assert!(!injector.is_applied(&profile).await);

        // Idempotent: a second remove is a no-op, not an error.
        injector.remove(&profile).await;
        assert!(!injector.is_applied(&profile).await);
    }

    #[tokio::test]
    async fn test_inline_style_is_first_choice_with_provenance() {
        let page = Arc::new(MemoryPage::new());
        let injector = injector(&page);
        let profile = test_profile();
        let source = Url::parse("https://cdn.test.example/a.css").unwrap();

        assert!(injector.apply(&profile, CSS, Some(&source)).await);

        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.kind, ElementKind::Style);
        assert_eq!(element.attrs.get("data-restyler-technique").unwrap(), "inline-style");
        assert_eq!(element.attrs.get("data-restyler-source").unwrap(), source.as_str());
    }

    #[tokio::test]
    async fn test_falls_through_to_local_url_link() {
        let page = Arc::new(MemoryPage::new());
        page.set_kind_inert(ElementKind::Style, true);
        let injector = injector(&page);
        let profile = test_profile();

        assert!(injector.apply(&profile, CSS, None).await);

        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.kind, ElementKind::LocalLink);
        assert_eq!(element.sheet.as_deref(), Some(CSS));
    }

    #[tokio::test]
    async fn test_falls_through_to_remote_link() {
        let page = Arc::new(MemoryPage::new());
        page.set_kind_inert(ElementKind::Style, true);
        page.set_kind_inert(ElementKind::LocalLink, true);
        let injector = injector(&page);
        let profile = test_profile();
        let source = Url::parse("https://cdn.test.example/a.css").unwrap();

        assert!(injector.apply(&profile, CSS, Some(&source)).await);

        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.kind, ElementKind::RemoteLink);
        assert_eq!(element.href.as_ref().unwrap(), &source);
        // The local URL minted for the failed middle technique was released.
        assert_eq!(page.local_url_count(), 0);
    }

    #[tokio::test]
    async fn test_all_techniques_fail_leaves_nothing_behind() {
        let page = Arc::new(MemoryPage::new());
        page.set_kind_inert(ElementKind::Style, true);
        page.set_kind_inert(ElementKind::LocalLink, true);
        page.set_kind_inert(ElementKind::RemoteLink, true);
        let injector = injector(&page);
        let profile = test_profile();
        let source = Url::parse("https://cdn.test.example/a.css").unwrap();

        assert!(!injector.apply(&profile, CSS, Some(&source)).await);
        assert!(!injector.is_applied(&profile).await);
        assert_eq!(page.local_url_count(), 0);
    }

    #[tokio::test]
    async fn test_replacement_keeps_single_artifact_and_releases_url() {
        let page = Arc::new(MemoryPage::new());
        page.set_kind_inert(ElementKind::Style, true);
        let injector = injector(&page);
        let profile = test_profile();

        assert!(injector.apply(&profile, CSS, None).await);
        assert_eq!(page.local_url_count(), 1);

        assert!(injector.apply(&profile, "main{display:grid}", None).await);
        // Old URL released on replacement; exactly one artifact, new sheet.
        assert_eq!(page.local_url_count(), 1);
        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.sheet.as_deref(), Some("main{display:grid}"));
    }

    #[tokio::test]
    async fn test_no_local_urls_capability_skips_technique() {
        let page = Arc::new(MemoryPage::new());
        page.set_kind_inert(ElementKind::Style, true);
        let config = AppConfig { verify_window_ms: 300, ..Default::default() };
        let caps = Capabilities { privileged_transport: true, local_urls: false };
        let injector = DomInjector::new(Arc::clone(&page), caps, &config);
        let profile = test_profile();
        let source = Url::parse("https://cdn.test.example/a.css").unwrap();

        assert!(injector.apply(&profile, CSS, Some(&source)).await);
        let element = page.element(&profile.artifact_id).unwrap();
        assert_eq!(element.kind, ElementKind::RemoteLink);
        assert_eq!(page.local_url_count(), 0);
    }
}
