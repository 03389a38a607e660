use std::time::Duration;

use url::Url;

use crate::cache::DEFAULT_CACHE_NAME;

pub const DEFAULT_ORIGIN_NAME: &str = "default";
pub const DEFAULT_ORIGIN_TYPE: &str = "prometheus";
pub const DEFAULT_ORIGIN_UPSTREAM: &str = "http://127.0.0.1:9090";
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 180;

/// Configuration of one upstream origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    pub name: String,
    /// Client variant, matched case-insensitively. Empty selects the default.
    pub origin_type: String,
    /// Named cache this origin stores responses in.
    pub cache_name: String,
    pub upstream: Url,
    /// Per-request upstream timeout.
    pub timeout: Duration,
}

impl OriginConfig {
    pub fn new(name: impl Into<String>, origin_type: impl Into<String>, upstream: Url) -> Self {
        Self {
            name: name.into(),
            origin_type: origin_type.into(),
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            upstream,
            timeout: Duration::from_secs(DEFAULT_ORIGIN_TIMEOUT_SECS),
        }
    }

    pub fn with_cache(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }

    /// Lower-cased, trimmed type used for client selection.
    pub fn normalized_type(&self) -> String {
        normalize_origin_type(&self.origin_type)
    }
}

/// Whether `name` can be mounted as a literal `/{name}` route prefix.
pub fn is_mountable_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(['/', '{', '}', '*'])
}

pub(crate) fn normalize_origin_type(origin_type: &str) -> String {
    origin_type.trim().to_ascii_lowercase()
}
