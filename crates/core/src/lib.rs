//! Core types and shared functionality for restyler.
//!
//! This crate provides:
//! - SQLite-backed style cache with TTL and fingerprint invalidation
//! - Site profiles and host matching
//! - Unified error types
//! - Layered configuration

pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod profile;
pub mod urlnorm;

pub use cache::{CacheDb, CachedStyle};
pub use capability::Capabilities;
pub use config::AppConfig;
pub use error::Error;
pub use profile::{InjectionPoint, ProfileSet, Readiness, SiteProfile};
