//! Semantic version matching.
//!
//! Range expressions are comma-separated comparator lists (`>=2.0.0,<3.0.0`,
//! `^1.4`, `~2.3.1`, `1.2.*`). Each comparator is lowered to a lower and/or
//! upper bound, so every range is a single interval and two ranges conflict
//! exactly when their intervals are disjoint.
//!
//! A bare version (`2.4.0`, `==2.4.0`) pins exactly, as in a Python
//! requirement, rather than acting as a caret range. PEP 440 operators with
//! no semver counterpart (`!=`, `~=`, `===`) are rejected as malformed.
//!
//! Matching follows plain semver precedence: pre-releases sort before their
//! release and build metadata is ignored. Upper bounds derived from partial,
//! caret, tilde and wildcard comparators are `X.Y.Z-0`, which keeps
//! pre-releases of the next excluded release out of the range.

use std::cmp::Ordering;
use std::fmt;

use semver::{BuildMetadata, Comparator, Op, Prerelease, Version, VersionReq};
use thiserror::Error;

/// A version or range that is not valid semver syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("malformed version '{input}': {reason}")]
    Malformed { input: String, reason: String },

    #[error("malformed version range '{input}': {reason}")]
    MalformedRange { input: String, reason: String },
}

impl VersionError {
    /// The offending input string.
    pub fn input(&self) -> &str {
        match self {
            Self::Malformed { input, .. } | Self::MalformedRange { input, .. } => input,
        }
    }
}

/// Parse a strict semver version (`1.2.3`, `2.0.0-rc.1`).
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    Version::parse(input.trim()).map_err(|e| VersionError::Malformed {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a version as published by a package index.
///
/// Accepts a leading `v` and pads `10.0` / `10` to three components. Returns
/// `None` for listings that are not semver at all (`1.0rc1`, `2019.1.post3`).
pub fn parse_lenient(input: &str) -> Option<Version> {
    let trimmed = input.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return None;
    }
    if !parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    Version::parse(&padded).ok()
}

/// Check a candidate version against a range expression.
pub fn matches(candidate: &str, range: &str) -> Result<bool, VersionError> {
    let version = parse_version(candidate)?;
    let range = VersionRange::parse(range)?;
    Ok(range.contains(&version))
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl Bound {
    fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

/// A parsed range expression, reduced to one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionRange {
    /// The range that accepts every version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            lower: None,
            upper: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self {
                raw: trimmed.to_string(),
                ..Self::any()
            });
        }

        let normalized = trimmed
            .split(',')
            .map(normalize_comparator)
            .collect::<Vec<_>>()
            .join(",");
        let req = VersionReq::parse(&normalized).map_err(|e| VersionError::MalformedRange {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        let mut range = Self {
            raw: trimmed.to_string(),
            lower: None,
            upper: None,
        };
        for comparator in &req.comparators {
            let (lower, upper) =
                lower_comparator(comparator).map_err(|reason| VersionError::MalformedRange {
                    input: input.to_string(),
                    reason,
                })?;
            if let Some(b) = lower {
                range.lower = Some(tighter_lower(range.lower.take(), b));
            }
            if let Some(b) = upper {
                range.upper = Some(tighter_upper(range.upper.take(), b));
            }
        }

        Ok(range)
    }

    /// The expression this range was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn lower(&self) -> Option<&Bound> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Bound> {
        self.upper.as_ref()
    }

    /// Whether `version` lies inside the interval. Build metadata is ignored.
    pub fn contains(&self, version: &Version) -> bool {
        let version = without_build(version);

        if let Some(lower) = &self.lower {
            match version.cmp(&lower.version) {
                Ordering::Less => return false,
                Ordering::Equal if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match version.cmp(&upper.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !upper.inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// True when no version can satisfy the range (e.g. `>=3.0.0,<2.0.0`).
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) => match lower.version.cmp(&upper.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lower.inclusive && upper.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// The range satisfied by both inputs, or `None` if they are disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let lower = match (self.lower.clone(), other.lower.clone()) {
            (Some(a), Some(b)) => Some(tighter_lower(Some(a), b)),
            (a, b) => a.or(b),
        };
        let upper = match (self.upper.clone(), other.upper.clone()) {
            (Some(a), Some(b)) => Some(tighter_upper(Some(a), b)),
            (a, b) => a.or(b),
        };

        let merged = Self {
            raw: format!("{},{}", self.raw, other.raw),
            lower,
            upper,
        };
        (!merged.is_empty()).then_some(merged)
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.intersect(other).is_none()
    }

    /// Highest version in `available` that satisfies the range.
    pub fn best_match<'a>(&self, available: &'a [Version]) -> Option<&'a Version> {
        available.iter().filter(|v| self.contains(v)).max()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Rewrite one comparator into the syntax `semver` reads: `==` becomes `=`
/// and a bare version gets an explicit `=` so it is not read as a caret.
fn normalize_comparator(part: &str) -> String {
    let part = part.trim();
    match part.strip_prefix("==") {
        Some(rest) if !rest.starts_with('=') => return format!("={}", rest.trim_start()),
        _ => {}
    }
    let bare = part.starts_with(|c: char| c.is_ascii_digit());
    let wildcard = part.split('.').any(|seg| matches!(seg, "*" | "x" | "X"));
    if bare && !wildcard {
        format!("={part}")
    } else {
        part.to_string()
    }
}

fn without_build(version: &Version) -> Version {
    Version {
        build: BuildMetadata::EMPTY,
        ..version.clone()
    }
}

fn tighter_lower(current: Option<Bound>, candidate: Bound) -> Bound {
    let Some(current) = current else {
        return candidate;
    };
    match candidate.version.cmp(&current.version) {
        Ordering::Greater => candidate,
        Ordering::Less => current,
        Ordering::Equal => Bound {
            inclusive: current.inclusive && candidate.inclusive,
            version: current.version,
        },
    }
}

fn tighter_upper(current: Option<Bound>, candidate: Bound) -> Bound {
    let Some(current) = current else {
        return candidate;
    };
    match candidate.version.cmp(&current.version) {
        Ordering::Less => candidate,
        Ordering::Greater => current,
        Ordering::Equal => Bound {
            inclusive: current.inclusive && candidate.inclusive,
            version: current.version,
        },
    }
}

/// `major.minor.patch-0`: the lowest version with that release triple.
fn floor_of(major: u64, minor: u64, patch: u64) -> Version {
    Version {
        major,
        minor,
        patch,
        pre: Prerelease::new("0").unwrap_or(Prerelease::EMPTY),
        build: BuildMetadata::EMPTY,
    }
}

/// `n + 1`, or a reason when the component is already at its maximum.
fn next(n: u64) -> Result<u64, String> {
    n.checked_add(1)
        .ok_or_else(|| format!("version component {n} is too large"))
}

/// Exclusive upper bound covering every version that shares the specified
/// components of `c` (e.g. `1.2` → `<1.3.0-0`, `1` → `<2.0.0-0`).
fn partial_ceiling(c: &Comparator) -> Result<Version, String> {
    Ok(match (c.minor, c.patch) {
        (Some(minor), Some(patch)) => floor_of(c.major, minor, next(patch)?),
        (Some(minor), None) => floor_of(c.major, next(minor)?, 0),
        (None, _) => floor_of(next(c.major)?, 0, 0),
    })
}

type Bounds = (Option<Bound>, Option<Bound>);

fn lower_comparator(c: &Comparator) -> Result<Bounds, String> {
    let minor = c.minor.unwrap_or(0);
    let patch = c.patch.unwrap_or(0);
    let base = Version {
        major: c.major,
        minor,
        patch,
        pre: c.pre.clone(),
        build: BuildMetadata::EMPTY,
    };
    let is_full = c.patch.is_some();

    let bounds = match c.op {
        Op::Exact | Op::Wildcard => {
            if is_full {
                (Some(Bound::inclusive(base.clone())), Some(Bound::inclusive(base)))
            } else {
                (
                    Some(Bound::inclusive(base)),
                    Some(Bound::exclusive(partial_ceiling(c)?)),
                )
            }
        }
        Op::Greater => {
            if is_full {
                (Some(Bound::exclusive(base)), None)
            } else {
                // `>1.2` means "above every 1.2.x"
                let above = match c.minor {
                    Some(minor) => Version::new(c.major, next(minor)?, 0),
                    None => Version::new(next(c.major)?, 0, 0),
                };
                (Some(Bound::inclusive(above)), None)
            }
        }
        Op::GreaterEq => (Some(Bound::inclusive(base)), None),
        Op::Less => {
            if is_full {
                (None, Some(Bound::exclusive(base)))
            } else {
                (None, Some(Bound::exclusive(floor_of(c.major, minor, 0))))
            }
        }
        Op::LessEq => {
            if is_full {
                (None, Some(Bound::inclusive(base)))
            } else {
                (None, Some(Bound::exclusive(partial_ceiling(c)?)))
            }
        }
        Op::Tilde => {
            let ceiling = match c.minor {
                Some(minor) => floor_of(c.major, next(minor)?, 0),
                None => floor_of(next(c.major)?, 0, 0),
            };
            (Some(Bound::inclusive(base)), Some(Bound::exclusive(ceiling)))
        }
        Op::Caret => {
            let ceiling = match (c.major, c.minor, c.patch) {
                (0, Some(0), Some(patch)) => floor_of(0, 0, next(patch)?),
                (0, Some(minor), _) => floor_of(0, next(minor)?, 0),
                (major, _, _) => floor_of(next(major)?, 0, 0),
            };
            (Some(Bound::inclusive(base)), Some(Bound::exclusive(ceiling)))
        }
        _ => return Err(format!("unsupported comparator '{c}'")),
    };

    Ok(bounds)
}
