//! Capability descriptor for the hosting environment.
//!
//! Resolved once at startup and injected into the pipeline, instead of
//! sensing the environment ad hoc at each call site. Restricted hosts
//! (sandboxed webviews, browsers with weaker networking guarantees) flip
//! these off and the pipeline degrades to the transports and techniques
//! that remain.

/// What the hosting environment allows the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The process may issue native cross-origin HTTP requests itself.
    pub privileged_transport: bool,
    /// The target can mint local blob-style stylesheet URLs.
    pub local_urls: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { privileged_transport: true, local_urls: true }
    }
}

impl Capabilities {
    /// Everything off; only in-page fetch and inline injection remain viable.
    pub fn restricted() -> Self {
        Self { privileged_transport: false, local_urls: false }
    }
}
