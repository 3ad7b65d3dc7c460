//! Cursory stylesheet shape check.
//!
//! Transports that cannot observe the origin status (URL-rewriting relays)
//! hand back whatever the relay produced, so every body passes through this
//! gate before it is accepted. This is deliberately not a CSS parser: it
//! only rejects bodies that are empty, suspiciously small, or look like an
//! HTML error page instead of a stylesheet.

use thiserror::Error;

/// Bodies smaller than this are assumed to be error stubs, not stylesheets.
const MIN_STYLESHEET_BYTES: usize = 8;

/// Why a body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("body is empty after trimming")]
    Empty,

    #[error("body too short: {0} bytes")]
    TooShort(usize),

    #[error("body looks like an HTML document")]
    LooksLikeHtml,

    #[error("body contains no rule block")]
    NoRuleBlock,
}

/// Validate that a fetched body plausibly is a stylesheet, returning the
/// trimmed text on success.
pub fn validate_stylesheet(body: &str) -> Result<&str, ShapeError> {
    let trimmed = body.trim();

    if trimmed.is_empty() {
        return Err(ShapeError::Empty);
    }

    if trimmed.len() < MIN_STYLESHEET_BYTES {
        return Err(ShapeError::TooShort(trimmed.len()));
    }

    let head: String = trimmed.chars().take(64).collect::<String>().to_ascii_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") || head.starts_with("<?xml") {
        return Err(ShapeError::LooksLikeHtml);
    }

    // An HTML error page rarely has one; a stylesheet always does.
    if !trimmed.contains('{') {
        return Err(ShapeError::NoRuleBlock);
    }

    Ok(trimmed)
}
