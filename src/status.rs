//! Status-code metadata.
//!
//! Thin queries over [`http::StatusCode`] used by response finalization and
//! the error path: which codes forbid a body, which are redirects, and what
//! the canonical reason phrase is.

use http::StatusCode;

/// Codes whose responses must not carry a body.
pub fn is_empty(code: StatusCode) -> bool {
    matches!(code.as_u16(), 204 | 205 | 304)
}

/// Codes that instruct the client to follow a `Location`.
pub fn is_redirect(code: StatusCode) -> bool {
    matches!(code.as_u16(), 300 | 301 | 302 | 303 | 305 | 307 | 308)
}

/// Returns the status if it is a registered code with a reason phrase.
pub fn known(code: u16) -> Option<StatusCode> {
    StatusCode::from_u16(code)
        .ok()
        .filter(|s| s.canonical_reason().is_some())
}

/// The canonical reason phrase, or the bare number for unregistered codes.
pub fn message(code: u16) -> String {
    known(code)
        .and_then(|s| s.canonical_reason())
        .map_or_else(|| code.to_string(), str::to_owned)
}
