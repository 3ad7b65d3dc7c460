//! SQLite-backed persistence for cached styles, per-profile flags, and a
//! rolling error log.
//!
//! This module provides a persistent cache using SQLite with async access
//! via tokio-rusqlite. It supports:
//!
//! - One cached stylesheet per profile with TTL and fingerprint invalidation
//! - The per-profile enabled/disabled toggle
//! - A rolling diagnostic error log, pruned oldest-first
//! - Automatic schema migrations and WAL mode
//!
//! Reads fail closed (treated as absent) and writes fail soft (logged,
//! reported to the caller as a boolean); storage trouble never stops the
//! pipeline.

pub mod connection;
pub mod migrations;
pub mod styles;

pub use crate::Error;

pub use connection::CacheDb;
pub use styles::{CachedStyle, ErrorEntry};
