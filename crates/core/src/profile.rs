//! Site profiles: static per-site configuration for one managed stylesheet.
//!
//! A profile is selected once at startup by matching the page host and is
//! immutable for the process lifetime. Its fingerprint ties cache entries to
//! the configuration that produced them, so editing a profile's sources or
//! bumping its version invalidates stale cache rows without any explicit
//! flush.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::urlnorm;

/// Where the injected element is attached in the target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPoint {
    Head,
    Body,
}

/// Predicate that must hold before injection is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Inject as soon as the document exists.
    Always,
    /// Wait until the selector matches at least one element.
    Selector(String),
}

/// Static per-site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Identifying name; doubles as the cache key.
    pub name: String,

    /// Host names this profile applies to (exact or subdomain suffix match).
    pub hosts: Vec<String>,

    /// Candidate stylesheet URLs in priority order. Aliased mirrors of the
    /// same resource are fine; order is meaningful.
    pub sources: Vec<String>,

    /// Stable id carried by the injected element.
    pub artifact_id: String,

    #[serde(default = "default_injection_point")]
    pub injection_point: InjectionPoint,

    #[serde(default = "default_readiness")]
    pub readiness: Readiness,

    /// Hosts that rebuild their DOM so often that mutation notifications are
    /// unreliable; supervision falls back to interval polling.
    #[serde(default)]
    pub aggressive_supervision: bool,

    /// Bumped by the profile author to force cache invalidation.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Hard-coded minimal styling applied when every network attempt failed.
    #[serde(default)]
    pub fallback_css: Option<String>,
}

fn default_injection_point() -> InjectionPoint {
    InjectionPoint::Head
}

fn default_readiness() -> Readiness {
    Readiness::Always
}

fn default_version() -> u32 {
    1
}

impl SiteProfile {
    /// Whether this profile applies to the given page host.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|h| host == h.to_ascii_lowercase() || host.ends_with(&format!(".{}", h.to_ascii_lowercase())))
    }

    /// Identity fingerprint derived from name, version, and the ordered
    /// source list. Cache entries carrying a different fingerprint are
    /// treated as absent.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.version.to_le_bytes());
        for source in &self.sources {
            hasher.update(b"\n");
            hasher.update(source.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Sources parsed and canonicalized, invalid entries skipped with a log.
    pub fn canonical_sources(&self) -> Vec<url::Url> {
        self.sources
            .iter()
            .filter_map(|raw| match urlnorm::canonicalize(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(profile = %self.name, source = %raw, "skipping unusable source: {e}");
                    None
                }
            })
            .collect()
    }

    /// Whether a previously cached source URL still belongs to this profile.
    pub fn owns_source(&self, source_url: &str) -> bool {
        self.canonical_sources().iter().any(|u| u.as_str() == source_url)
    }
}

/// The set of profiles known to this process.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: Vec<SiteProfile>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<SiteProfile>) -> Self {
        Self { profiles }
    }

    /// Select the profile for a page host. First match wins.
    pub fn for_host(&self, host: &str) -> Option<&SiteProfile> {
        self.profiles.iter().find(|p| p.matches_host(host))
    }

    pub fn by_name(&self, name: &str) -> Option<&SiteProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteProfile> {
        self.profiles.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Built-in profiles for the two supported chat applications. Operators
/// override or extend these through the config file.
pub fn default_profiles() -> Vec<SiteProfile> {
    vec![
        SiteProfile {
            name: "deepseek".into(),
            hosts: vec!["chat.deepseek.com".into()],
            sources: vec![
                "https://cdn.jsdelivr.net/gh/restyler-themes/deepseek-dim@main/deepseek.css".into(),
                "https://fastly.jsdelivr.net/gh/restyler-themes/deepseek-dim@main/deepseek.css".into(),
                "https://raw.githubusercontent.com/restyler-themes/deepseek-dim/main/deepseek.css".into(),
            ],
            artifact_id: "restyler-deepseek".into(),
            injection_point: InjectionPoint::Head,
            readiness: Readiness::Selector("#root".into()),
            aggressive_supervision: false,
            version: 1,
            fallback_css: None,
        },
        SiteProfile {
            name: "kimi".into(),
            hosts: vec!["kimi.moonshot.cn".into(), "www.kimi.com".into()],
            sources: vec![
                "https://cdn.jsdelivr.net/gh/restyler-themes/kimi-dim@main/kimi.css".into(),
                "https://fastly.jsdelivr.net/gh/restyler-themes/kimi-dim@main/kimi.css".into(),
                "https://raw.githubusercontent.com/restyler-themes/kimi-dim/main/kimi.css".into(),
            ],
            artifact_id: "restyler-kimi".into(),
            injection_point: InjectionPoint::Head,
            readiness: Readiness::Selector("#app".into()),
            aggressive_supervision: true,
            version: 1,
            fallback_css: Some("body{color-scheme:dark}".into()),
        },
    ]
}
