//! Cache key layout: `{kind}_{scope}_{rangeId}[_{subtype}]`.
//!
//! Website ids are unique only within one account, so the scope always
//! carries the account id (and the website id where one applies) to keep
//! keys collision-free across accounts.

use std::fmt;

use sitepulse_core::daterange::DateRange;

/// Entry kind; the TTL is fixed per kind, not caller-overridable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Websites,
    Stats,
    Sparkline,
    Metrics,
}

const DEFAULT_TTL_SECS: i64 = 3600;
/// Sparkline series churn fast enough that an hour-old curve is misleading.
const SPARKLINE_TTL_SECS: i64 = 900;

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Websites => "websites",
            CacheKind::Stats => "stats",
            CacheKind::Sparkline => "sparkline",
            CacheKind::Metrics => "metrics",
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        match self {
            CacheKind::Sparkline => SPARKLINE_TTL_SECS,
            _ => DEFAULT_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub kind: CacheKind,
    scope: String,
    range_id: String,
    subtype: Option<String>,
}

/// Scope and subtype segments must not contain the `_` key separator, the
/// `-` joining account and website, or path characters; anything outside
/// the segment alphabet becomes `.`. Keeping `-` out of segments is what
/// makes the account/website join unambiguous: account `a-b` site `c` and
/// account `a` site `b-c` must not collide.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '.'
            }
        })
        .collect()
}

impl CacheKey {
    /// Key for a per-website, per-range entry.
    pub fn for_website(
        kind: CacheKind,
        account_id: &str,
        website_id: &str,
        range: &DateRange,
    ) -> Self {
        Self {
            kind,
            scope: format!("{}-{}", sanitize(account_id), sanitize(website_id)),
            range_id: range.range_id(),
            subtype: None,
        }
    }

    /// Key for an account-wide entry (the website list).
    pub fn for_account(kind: CacheKind, account_id: &str) -> Self {
        Self {
            kind,
            scope: sanitize(account_id),
            range_id: "all".to_string(),
            subtype: None,
        }
    }

    /// Distinguish entries of the same kind and range, e.g. one metrics key
    /// per breakdown dimension.
    pub fn with_subtype(mut self, subtype: &str) -> Self {
        self.subtype = Some(sanitize(subtype));
        self
    }

    /// `true` when this key's scope references the website id. The website
    /// segment is the scope suffix, so a site id that happens to prefix
    /// another never matches it.
    pub fn scopes_website(&self, website_id: &str) -> bool {
        scope_matches_website(&self.scope, website_id)
    }

    pub(crate) fn scope_of_file_name(file_name: &str) -> Option<&str> {
        file_name.strip_suffix(".json")?.split('_').nth(1)
    }
}

pub(crate) fn scope_matches_website(scope: &str, website_id: &str) -> bool {
    scope.ends_with(&format!("-{}", sanitize(website_id)))
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind.as_str(), self.scope, self.range_id)?;
        if let Some(subtype) = &self.subtype {
            write!(f, "_{subtype}")?;
        }
        Ok(())
    }
}
