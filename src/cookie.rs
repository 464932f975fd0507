//! `Set-Cookie` rendering and `Cookie` header parsing.

use chrono::{Duration, Utc};
use http::header::COOKIE;
use http::HeaderMap;

use crate::session::CookieOptions;

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Expiry written on deletion cookies.
const EXPIRED: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// Build a `Set-Cookie` header value.
///
/// A negative `max_age` produces a cookie the client discards immediately,
/// zero produces a browser-session cookie without `Max-Age`/`Expires`.
pub fn build_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut cookie = format!("{}={}", name, value);

    cookie.push_str(&format!("; Path={}", options.path));

    if let Some(ref domain) = options.domain {
        cookie.push_str(&format!("; Domain={}", domain));
    }

    if options.max_age > 0 {
        cookie.push_str(&format!("; Max-Age={}", options.max_age));
        let expires = Duration::try_seconds(options.max_age)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        if let Some(expires) = expires {
            cookie.push_str(&format!("; Expires={}", expires.format(EXPIRES_FORMAT)));
        }
    } else if options.max_age < 0 {
        cookie.push_str(&format!("; Max-Age=0; Expires={}", EXPIRED));
    }

    if options.secure {
        cookie.push_str("; Secure");
    }

    if options.http_only {
        cookie.push_str("; HttpOnly");
    }

    if let Some(same_site) = options.same_site.as_attribute() {
        cookie.push_str(&format!("; SameSite={}", same_site));
    }

    cookie
}

/// Find the value of cookie `name` across all `Cookie` headers.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|header| parse_cookie_header(header, name))
}

/// Parse a single cookie value out of a `Cookie` header.
pub fn parse_cookie_header(cookie_header: &str, name: &str) -> Option<String> {
    for part in cookie_header.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        if key.trim() == name {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}
