//! Total order on catalog version strings.
//!
//! A version is "semver" if, after an optional leading `v`, it parses as
//! `MAJOR.MINOR.PATCH` with optional pre-release and build metadata. Semver
//! versions always outrank non-semver ones; two non-semver versions fall
//! back to their publish timestamps.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Parse a version string, tolerating a leading `v`.
pub fn parse_semver(version: &str) -> Option<semver::Version> {
    let trimmed = version.trim();
    let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(stripped).ok()
}

/// Compare two versions with their publish timestamps.
///
/// Rules, in order:
/// 1. Both semver: standard semver precedence (pre-release < release).
///    Timestamps are not consulted; equal versions compare equal.
/// 2. Exactly one semver: the semver side wins unconditionally.
/// 3. Neither semver: publish time order; a missing timestamp sorts first.
pub fn compare(
    a: &str,
    b: &str,
    published_a: Option<DateTime<Utc>>,
    published_b: Option<DateTime<Utc>>,
) -> Ordering {
    match (parse_semver(a), parse_semver(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => compare_timestamps(published_a, published_b),
    }
}

fn compare_timestamps(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// A latest-election candidate.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub version: &'a str,
    pub published_at: Option<DateTime<Utc>>,
}

/// Index of the winning candidate, or `None` for an empty slate.
///
/// Election is a fold with [`compare`]; versions that compare equal are
/// tie-broken by the later publish time, and the earlier candidate keeps
/// the win on a full tie. Publish state is deliberately not consulted: an
/// unpublished record is still eligible to be latest.
pub fn find_latest(candidates: &[Candidate<'_>]) -> Option<usize> {
    let mut winner: Option<usize> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        match winner {
            None => winner = Some(idx),
            Some(w) => {
                let current = &candidates[w];
                match compare(
                    candidate.version,
                    current.version,
                    candidate.published_at,
                    current.published_at,
                ) {
                    Ordering::Greater => winner = Some(idx),
                    Ordering::Equal => {
                        if compare_timestamps(candidate.published_at, current.published_at)
                            == Ordering::Greater
                        {
                            winner = Some(idx);
                        }
                    }
                    Ordering::Less => {}
                }
            }
        }
    }
    winner
}
