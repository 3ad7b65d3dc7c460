//! The seam between the pipeline and a live document.
//!
//! Everything the injector and supervisor need from a page is expressed
//! here; the pipeline never talks to a browser directly. Implementations:
//! `MemoryPage` (in-process document model) and, behind the `browser`
//! feature, `CdpPage` (a real page over the Chrome DevTools Protocol).

use async_trait::async_trait;
use restyler_core::{Error, InjectionPoint};
use std::time::Duration;
use url::Url;

/// How an artifact element should be created.
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    /// Stable element id; presence of this id is what `is_applied` means.
    pub id: String,
    /// Preferred attachment point. Targets fall back to the document root
    /// when the point does not exist yet.
    pub point: InjectionPoint,
    /// Which source produced the content (URL, or "inline" for fallback).
    pub source: String,
    /// Which injection technique created the element.
    pub technique: &'static str,
}

/// A document that styles can be applied to.
#[async_trait]
pub trait StyleTarget: Send + Sync {
    /// Whether the readiness selector currently matches anything.
    async fn selector_exists(&self, selector: &str) -> Result<bool, Error>;

    /// Insert a style element carrying `css` as text.
    async fn insert_style(&self, spec: &ArtifactSpec, css: &str) -> Result<(), Error>;

    /// Insert a stylesheet link pointing at `href`.
    async fn insert_link(&self, spec: &ArtifactSpec, href: &Url) -> Result<(), Error>;

    /// Mint a document-local URL serving `css` (object-URL style).
    async fn create_local_url(&self, css: &str) -> Result<Url, Error>;

    /// Release a previously minted local URL. Idempotent; releasing does
    /// not unload a stylesheet that already finished applying.
    async fn release_local_url(&self, url: &Url);

    /// Remove the element with `id`. Returns whether anything was removed.
    async fn remove_element(&self, id: &str) -> Result<bool, Error>;

    /// Whether an element with `id` is currently in the document.
    async fn element_present(&self, id: &str) -> Result<bool, Error>;

    /// Whether the element with `id` owns a parsed, non-empty stylesheet.
    /// This is the verification probe behind every injection technique.
    async fn stylesheet_active(&self, id: &str) -> Result<bool, Error>;

    /// Current document URL, when the target can report one.
    async fn current_url(&self) -> Option<String>;

    /// Whether the document is currently visible.
    async fn is_visible(&self) -> bool;

    /// Wait until something mutates in the document, or `timeout` elapses.
    async fn wait_for_mutation(&self, timeout: Duration);
}
