//! Cached stylesheet CRUD, the enabled flag, and the rolling error log.
//!
//! One row per profile, replaced wholesale on every store. Lookups fail
//! closed: a row that is expired, carries a stale fingerprint, or points at
//! a source the profile no longer lists is treated as absent. Storage
//! failures on the write path are reported as `false`, never raised.

use super::connection::CacheDb;
use crate::profile::SiteProfile;
use crate::Error;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Rows kept in the error log before the oldest are pruned.
const ERROR_LOG_CAP: usize = 10;

/// A cached stylesheet with the metadata needed for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStyle {
    pub css: String,
    pub stored_at: DateTime<Utc>,
    pub source_url: String,
    pub fingerprint: String,
}

/// One persisted diagnostic entry.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub occurred_at: String,
    pub profile: String,
    pub message: String,
}

impl CacheDb {
    /// Store a fetched stylesheet for a profile, replacing any previous row.
    ///
    /// Returns false on storage failure; the caller proceeds without cache.
    pub async fn put_style(&self, profile: &SiteProfile, css: &str, source_url: &str) -> bool {
        let name = profile.name.clone();
        let fingerprint = profile.fingerprint();
        let css = css.to_string();
        let source_url = source_url.to_string();
        let stored_at = Utc::now().to_rfc3339();

        let result = self
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO styles (profile, css, stored_at, source_url, fingerprint)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(profile) DO UPDATE SET
                        css = excluded.css,
                        stored_at = excluded.stored_at,
                        source_url = excluded.source_url,
                        fingerprint = excluded.fingerprint",
                    params![name, css, stored_at, source_url, fingerprint],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(profile = %profile.name, "style cache write failed: {e}");
                false
            }
        }
    }

    /// Fetch the cached stylesheet for a profile, if still valid.
    ///
    /// Returns None (never an error) when the row is missing, unreadable,
    /// older than `ttl`, fingerprinted for a different profile
    /// configuration, or sourced from a URL the profile no longer lists.
    pub async fn get_style(&self, profile: &SiteProfile, ttl: Duration) -> Option<CachedStyle> {
        let name = profile.name.clone();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<(String, String, String, String)>, Error> {
                let mut stmt =
                    conn.prepare("SELECT css, stored_at, source_url, fingerprint FROM styles WHERE profile = ?1")?;
                let result = stmt.query_row(params![name], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                });
                match result {
                    Ok(r) => Ok(Some(r)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await;

        let (css, stored_at_raw, source_url, fingerprint) = match row {
            Ok(Some(r)) => r,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(profile = %profile.name, "style cache read failed: {e}");
                return None;
            }
        };

        let stored_at = match DateTime::parse_from_rfc3339(&stored_at_raw) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(profile = %profile.name, "unreadable cache timestamp {stored_at_raw:?}: {e}");
                return None;
            }
        };

        let ttl = chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX);
        if Utc::now().signed_duration_since(stored_at) > ttl {
            tracing::debug!(profile = %profile.name, "cached style expired");
            return None;
        }

        if fingerprint != profile.fingerprint() {
            tracing::debug!(profile = %profile.name, "cached style fingerprint is stale");
            return None;
        }

        if !profile.owns_source(&source_url) {
            tracing::debug!(profile = %profile.name, source = %source_url, "cached style source no longer listed");
            return None;
        }

        Some(CachedStyle { css, stored_at, source_url, fingerprint })
    }

    /// Delete cached styles, optionally restricted to profiles whose name
    /// starts with `prefix`. Returns the number of rows removed.
    pub async fn clear_styles(&self, prefix: Option<&str>) -> Result<u64, Error> {
        let prefix = prefix.map(|p| p.to_string());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = match prefix {
                    Some(p) => {
                        let pattern = format!("{}%", p.replace('%', "\\%").replace('_', "\\_"));
                        conn.execute(
                            "DELETE FROM styles WHERE profile LIKE ?1 ESCAPE '\\'",
                            params![pattern],
                        )?
                    }
                    None => conn.execute("DELETE FROM styles", [])?,
                };
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether styling is enabled for a profile. Absent rows and storage
    /// errors both read as enabled.
    pub async fn is_enabled(&self, profile_name: &str) -> bool {
        let name = profile_name.to_string();
        let result = self
            .conn
            .call(move |conn| -> Result<Option<bool>, Error> {
                let result = conn.query_row("SELECT enabled FROM flags WHERE profile = ?1", params![name], |row| {
                    row.get::<_, i32>(0)
                });
                match result {
                    Ok(v) => Ok(Some(v == 1)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await;

        match result {
            Ok(Some(enabled)) => enabled,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(profile = %profile_name, "flag read failed, assuming enabled: {e}");
                true
            }
        }
    }

    /// Persist the enabled flag for a profile.
    pub async fn set_enabled(&self, profile_name: &str, enabled: bool) -> Result<(), Error> {
        let name = profile_name.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO flags (profile, enabled) VALUES (?1, ?2)
                     ON CONFLICT(profile) DO UPDATE SET enabled = excluded.enabled",
                    params![name, enabled as i32],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Append a diagnostic entry, pruning the log to its cap oldest-first.
    /// Best effort: failures are logged and swallowed.
    pub async fn record_error(&self, profile_name: &str, message: &str) {
        let name = profile_name.to_string();
        let message = message.to_string();
        let occurred_at = Utc::now().to_rfc3339();

        let result = self
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO error_log (occurred_at, profile, message) VALUES (?1, ?2, ?3)",
                    params![occurred_at, name, message],
                )?;
                conn.execute(
                    "DELETE FROM error_log WHERE id NOT IN (
                        SELECT id FROM error_log ORDER BY id DESC LIMIT ?1
                    )",
                    params![ERROR_LOG_CAP as i64],
                )?;
                Ok(())
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(profile = %profile_name, "error log write failed: {e}");
        }
    }

    /// Read recent diagnostic entries, newest first. Fails closed to empty.
    pub async fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        let result = self
            .conn
            .call(move |conn| -> Result<Vec<ErrorEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT occurred_at, profile, message FROM error_log ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| {
                        Ok(ErrorEntry { occurred_at: row.get(0)?, profile: row.get(1)?, message: row.get(2)? })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await;

        match result {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("error log read failed: {e}");
                Vec::new()
            }
        }
    }
}
