//! `Set-Cookie` extraction from headers and trailers.

use crate::header::HeaderMap;

/// Header name carrying cookies set by the server.
pub const SET_COOKIE: &str = "set-cookie";

/// Collect the raw `Set-Cookie` values of `headers` followed by those of
/// `trailers`, preserving the order within each store.
///
/// Values are returned as received; parsing cookie attributes is left to
/// the caller.
pub fn set_cookies(headers: &HeaderMap, trailers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .into_iter()
        .chain(trailers.get_all(SET_COOKIE))
        .map(str::to_owned)
        .collect()
}
