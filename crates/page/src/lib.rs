//! Applying and supervising styles on a live document.
//!
//! This crate owns everything on the page side of the pipeline: the
//! `StyleTarget` seam, the injector with its ordered techniques, the
//! per-profile pipeline context, and the reapplication supervisor. A
//! CDP-backed target for live browser pages is available behind the
//! `browser` feature; `MemoryPage` serves tests and embedding.

pub mod injector;
pub mod memory;
pub mod pipeline;
pub mod supervisor;
pub mod target;

#[cfg(feature = "browser")]
pub mod browser;

pub use injector::DomInjector;
pub use memory::MemoryPage;
pub use pipeline::StylePipeline;
pub use supervisor::{Supervisor, SupervisorState};
pub use target::{ArtifactSpec, StyleTarget};

#[cfg(feature = "browser")]
pub use browser::{CdpPage, InPageTransport};
