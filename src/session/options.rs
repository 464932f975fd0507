//! Cookie options shared by the store and copied into each session.

use serde::{Deserialize, Serialize};

/// Default session lifetime in seconds (30 days).
pub const DEFAULT_MAX_AGE_SECS: i64 = 86400 * 30;

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    /// Omit the attribute and let the browser decide.
    #[serde(alias = "default")]
    Default,
    #[default]
    #[serde(alias = "lax")]
    Lax,
    #[serde(alias = "strict")]
    Strict,
    #[serde(alias = "none")]
    None,
}

impl SameSite {
    /// Attribute value as written in `Set-Cookie`, if any.
    pub fn as_attribute(&self) -> Option<&'static str> {
        match self {
            SameSite::Default => None,
            SameSite::Lax => Some("Lax"),
            SameSite::Strict => Some("Strict"),
            SameSite::None => Some("None"),
        }
    }
}

/// Cookie attributes and lifetime policy.
///
/// `max_age` drives persistence: a negative value deletes the session on
/// save, zero issues a browser-session cookie, a positive value sets
/// `Max-Age`/`Expires` and bounds the sealed payload's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieOptions {
    /// Cookie path.
    #[serde(default = "default_path")]
    pub path: String,

    /// Cookie domain (optional, defaults to request host).
    #[serde(default)]
    pub domain: Option<String>,

    /// Lifetime in seconds.
    #[serde(default = "default_max_age")]
    pub max_age: i64,

    /// Require HTTPS for cookies (Secure flag).
    #[serde(default)]
    pub secure: bool,

    /// Set HttpOnly flag on cookies.
    #[serde(default = "default_true")]
    pub http_only: bool,

    #[serde(default)]
    pub same_site: SameSite,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_max_age() -> i64 {
    DEFAULT_MAX_AGE_SECS
}

fn default_true() -> bool {
    true
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            domain: None,
            max_age: default_max_age(),
            secure: false,
            http_only: true,
            same_site: SameSite::default(),
        }
    }
}

/// Partial cookie options for overriding the defaults from JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CookieOptionsJson {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
}

impl CookieOptionsJson {
    /// Merge JSON overrides into existing options.
    pub fn apply_to(&self, options: &mut CookieOptions) {
        if let Some(ref path) = self.path {
            options.path = path.clone();
        }
        if let Some(ref domain) = self.domain {
            options.domain = Some(domain.clone());
        }
        if let Some(max_age) = self.max_age {
            options.max_age = max_age;
        }
        if let Some(secure) = self.secure {
            options.secure = secure;
        }
        if let Some(http_only) = self.http_only {
            options.http_only = http_only;
        }
        if let Some(same_site) = self.same_site {
            options.same_site = same_site;
        }
    }
}
