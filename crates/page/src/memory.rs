//! In-memory document model implementing `StyleTarget`.
//!
//! Behaves like a minimal page: id-addressed elements, head/body attachment
//! points, object-style local URLs whose content is snapshotted at link
//! time (so releasing a URL does not unload an applied sheet, matching real
//! browsers), and mutation notifications. Tests drive SPA-like behavior
//! through the `simulate_*`/`set_*` helpers; embedders can use it as an
//! offline target.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use restyler_core::{Error, InjectionPoint};
use tokio::sync::Notify;
use url::Url;

use crate::target::{ArtifactSpec, StyleTarget};

/// What kind of element an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Style,
    LocalLink,
    RemoteLink,
}

/// One element in the fake document.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub kind: ElementKind,
    /// Sheet content resolved at insert time; None models a sheet that
    /// never finished loading.
    pub sheet: Option<String>,
    pub href: Option<Url>,
    pub attrs: HashMap<String, String>,
    /// Where the element actually landed.
    pub attached_to: &'static str,
}

#[derive(Debug)]
struct PageState {
    elements: HashMap<String, FakeElement>,
    head_present: bool,
    body_present: bool,
    selectors: HashSet<String>,
    local_urls: HashMap<String, String>,
    next_local: u64,
    url: String,
    visible: bool,
    /// Element kinds that insert fine but whose sheet never activates
    /// (models CSP blocking a technique).
    inert_kinds: HashSet<ElementKind>,
    /// Whether remote links are allowed to finish loading.
    remote_loads: bool,
    insert_count: u64,
}

/// In-memory `StyleTarget`.
pub struct MemoryPage {
    state: Mutex<PageState>,
    changed: Notify,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState {
                elements: HashMap::new(),
                head_present: true,
                body_present: true,
                selectors: HashSet::new(),
                local_urls: HashMap::new(),
                next_local: 1,
                url: "https://chat.test.example/".into(),
                visible: true,
                inert_kinds: HashSet::new(),
                remote_loads: true,
                insert_count: 0,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The page removed the element on its own (SPA re-render).
    pub fn simulate_external_wipe(&self, id: &str) -> bool {
        let removed = self.lock().elements.remove(id).is_some();
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    pub fn set_selector_present(&self, selector: &str, present: bool) {
        let mut state = self.lock();
        if present {
            state.selectors.insert(selector.to_string());
        } else {
            state.selectors.remove(selector);
        }
        drop(state);
        self.changed.notify_waiters();
    }

    pub fn set_url(&self, url: &str) {
        self.lock().url = url.to_string();
        self.changed.notify_waiters();
    }

    pub fn set_visible(&self, visible: bool) {
        self.lock().visible = visible;
        self.changed.notify_waiters();
    }

    pub fn set_points_present(&self, head: bool, body: bool) {
        let mut state = self.lock();
        state.head_present = head;
        state.body_present = body;
    }

    /// Make a technique's elements insert but never activate.
    pub fn set_kind_inert(&self, kind: ElementKind, inert: bool) {
        let mut state = self.lock();
        if inert {
            state.inert_kinds.insert(kind);
        } else {
            state.inert_kinds.remove(&kind);
        }
    }

    pub fn set_remote_loads(&self, loads: bool) {
        self.lock().remote_loads = loads;
    }

    pub fn element(&self, id: &str) -> Option<FakeElement> {
        self.lock().elements.get(id).cloned()
    }

    /// Live (unreleased) local URLs, for leak checks.
    pub fn local_url_count(&self) -> usize {
        self.lock().local_urls.len()
    }

    /// Total successful element inserts, for reapplication counting.
    pub fn insert_count(&self) -> u64 {
        self.lock().insert_count
    }

    fn insert(&self, spec: &ArtifactSpec, element: FakeElement) {
        let mut state = self.lock();
        state.elements.insert(spec.id.clone(), element);
        state.insert_count += 1;
        drop(state);
        self.changed.notify_waiters();
    }

    fn attachment(state: &PageState, point: InjectionPoint) -> &'static str {
        match point {
            InjectionPoint::Head if state.head_present => "head",
            InjectionPoint::Body if state.body_present => "body",
            _ => "root",
        }
    }

    fn base_attrs(spec: &ArtifactSpec) -> HashMap<String, String> {
        HashMap::from([
            ("data-restyler-source".into(), spec.source.clone()),
            ("data-restyler-technique".into(), spec.technique.into()),
        ])
    }
}

#[async_trait]
impl StyleTarget for MemoryPage {
    async fn selector_exists(&self, selector: &str) -> Result<bool, Error> {
        Ok(self.lock().selectors.contains(selector))
    }

    async fn insert_style(&self, spec: &ArtifactSpec, css: &str) -> Result<(), Error> {
        let attached_to = Self::attachment(&self.lock(), spec.point);
        self.insert(
            spec,
            FakeElement {
                kind: ElementKind::Style,
                sheet: Some(css.to_string()),
                href: None,
                attrs: Self::base_attrs(spec),
                attached_to,
            },
        );
        Ok(())
    }

    async fn insert_link(&self, spec: &ArtifactSpec, href: &Url) -> Result<(), Error> {
        let (kind, sheet, attached_to) = {
            let state = self.lock();
            let attached_to = Self::attachment(&state, spec.point);
            if href.scheme() == "memory" {
                // Content is snapshotted now; a later release must not
                // unload it.
                let sheet = state
                    .local_urls
                    .get(href.as_str())
                    .cloned()
                    .ok_or_else(|| Error::Target(format!("dangling local URL {href}")))?;
                (ElementKind::LocalLink, Some(sheet), attached_to)
            } else {
                let sheet = state.remote_loads.then(|| format!("/* loaded from {href} */"));
                (ElementKind::RemoteLink, sheet, attached_to)
            }
        };
        self.insert(
            spec,
            FakeElement { kind, sheet, href: Some(href.clone()), attrs: Self::base_attrs(spec), attached_to },
        );
        Ok(())
    }

    async fn create_local_url(&self, css: &str) -> Result<Url, Error> {
        let mut state = self.lock();
        let url = format!("memory://style/{}", state.next_local);
        state.next_local += 1;
        state.local_urls.insert(url.clone(), css.to_string());
        Url::parse(&url).map_err(|e| Error::Target(e.to_string()))
    }

    async fn release_local_url(&self, url: &Url) {
        self.lock().local_urls.remove(url.as_str());
    }

    async fn remove_element(&self, id: &str) -> Result<bool, Error> {
        let removed = self.lock().elements.remove(id).is_some();
        if removed {
            self.changed.notify_waiters();
        }
        Ok(removed)
    }

    async fn element_present(&self, id: &str) -> Result<bool, Error> {
        Ok(self.lock().elements.contains_key(id))
    }

    async fn stylesheet_active(&self, id: &str) -> Result<bool, Error> {
        let state = self.lock();
        let Some(element) = state.elements.get(id) else {
            return Ok(false);
        };
        if state.inert_kinds.contains(&element.kind) {
            return Ok(false);
        }
        Ok(element.sheet.as_ref().is_some_and(|s| !s.is_empty()))
    }

    async fn current_url(&self) -> Option<String> {
        Some(self.lock().url.clone())
    }

    async fn is_visible(&self) -> bool {
        self.lock().visible
    }

    async fn wait_for_mutation(&self, timeout: Duration) {
        tokio::select! {
            _ = self.changed.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}
