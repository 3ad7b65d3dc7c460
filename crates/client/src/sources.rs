//! Ordered candidate sources for one logical stylesheet.
//!
//! Order is priority order: earlier entries are strictly preferred. The one
//! mutation is `promote`, which moves the last URL that worked to the front
//! for the next cycle. Promotion is process-lifetime affinity and is never
//! persisted.

use restyler_core::SiteProfile;
use url::Url;

/// Ordered, prioritizable list of candidate URLs.
#[derive(Debug, Clone)]
pub struct SourceList {
    urls: Vec<Url>,
}

impl SourceList {
    /// Build the list from a profile's configured sources. Unusable entries
    /// were already dropped by canonicalization; duplicates and aliased
    /// mirrors are kept as the author wrote them.
    pub fn for_profile(profile: &SiteProfile) -> Self {
        Self { urls: profile.canonical_sources() }
    }

    /// Current priority order.
    pub fn candidates(&self) -> Vec<Url> {
        self.urls.clone()
    }

    /// Move a previously successful URL to the front. Unknown URLs are
    /// ignored.
    pub fn promote(&mut self, url: &Url) {
        if let Some(pos) = self.urls.iter().position(|u| u == url)
            && pos > 0
        {
            let promoted = self.urls.remove(pos);
            self.urls.insert(0, promoted);
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
