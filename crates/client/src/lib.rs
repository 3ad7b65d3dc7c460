//! Client side of the style pipeline for restyler.
//!
//! This crate provides the transports, source ordering, content validation,
//! and the retrieval protocol shared by the page pipeline and the CLI.

pub mod fetcher;
pub mod sources;
pub mod transport;
pub mod validate;

pub use fetcher::{FetchAttempt, StyleFetcher};
pub use sources::SourceList;
pub use transport::{DirectTransport, ProxyTransport, Transport, TransportSet};
pub use validate::{ShapeError, validate_stylesheet};
