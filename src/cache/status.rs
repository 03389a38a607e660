//! Lookup outcome classification.

use std::fmt;

/// Outcome of a cache retrieval or of a proxied request that consulted a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupStatus {
    /// Found and within its TTL.
    Hit,
    /// Found past its deadline and served because expired reads were allowed.
    ExpiredHit,
    /// Found past its deadline while expired reads were disallowed.
    Expired,
    /// Not present.
    Miss,
    /// The request was not eligible for caching and went straight upstream.
    ProxyOnly,
    /// The upstream could not be reached or failed.
    ProxyError,
    /// The cache failed and the caller recovered without it.
    Error,
}

impl LookupStatus {
    /// Stable spelling used in metric labels and response headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Hit => "hit",
            LookupStatus::ExpiredHit => "expired-hit",
            LookupStatus::Expired => "expired",
            LookupStatus::Miss => "kmiss",
            LookupStatus::ProxyOnly => "proxy-only",
            LookupStatus::ProxyError => "proxy-error",
            LookupStatus::Error => "error",
        }
    }

    /// True when the retrieval produced usable data.
    pub fn is_hit(&self) -> bool {
        matches!(self, LookupStatus::Hit | LookupStatus::ExpiredHit)
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(LookupStatus::Hit.to_string(), "hit");
        assert_eq!(LookupStatus::Miss.to_string(), "kmiss");
        assert_eq!(LookupStatus::ExpiredHit.to_string(), "expired-hit");
        assert_eq!(LookupStatus::ProxyOnly.as_str(), "proxy-only");
    }

    #[test]
    fn only_served_lookups_are_hits() {
        assert!(LookupStatus::Hit.is_hit());
        assert!(LookupStatus::ExpiredHit.is_hit());
        assert!(!LookupStatus::Expired.is_hit());
        assert!(!LookupStatus::Miss.is_hit());
    }
}
