//! Evidence references
//!
//! The wire form of an evidence item is `path` or `path:start-end`. The path
//! is everything before the *first* colon; whatever follows is kept verbatim
//! as the raw range string, because cached evidence records ranges exactly as
//! the reviewer emitted them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Parsed `path[:range]` evidence reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvidenceReference {
    path: String,
    range: Option<String>,
}

impl EvidenceReference {
    /// Reference a whole file
    #[inline]
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            range: None,
        }
    }

    /// Reference a line range in a file
    #[must_use]
    pub fn lines(path: impl Into<String>, range: LineRange) -> Self {
        Self {
            path: path.into(),
            range: Some(range.to_string()),
        }
    }

    /// File path (before the first `:`)
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw range string, if any
    #[inline]
    #[must_use]
    pub fn raw_range(&self) -> Option<&str> {
        self.range.as_deref()
    }

    /// Range parsed as `start-end` (or a single line)
    ///
    /// Returns `None` for bare paths and for ranges that do not follow the
    /// numeric grammar; those are still valid references.
    #[must_use]
    pub fn line_range(&self) -> Option<LineRange> {
        self.range.as_deref().and_then(|r| r.parse().ok())
    }
}

impl FromStr for EvidenceReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, range) = match s.split_once(':') {
            Some((path, range)) => (path, Some(range)),
            None => (s, None),
        };

        if path.trim().is_empty() {
            return Err(ReferenceError::EmptyPath(s.to_string()));
        }

        Ok(Self {
            path: path.to_string(),
            range: range.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }
}

impl Display for EvidenceReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "{}:{}", self.path, range),
            None => f.write_str(&self.path),
        }
    }
}

/// Inclusive 1-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Create range; `None` unless `1 <= start <= end`
    #[must_use]
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }
}

impl FromStr for LineRange {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReferenceError::InvalidRange(s.to_string());
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (s.trim(), s.trim()),
        };
        let start = start.parse::<u32>().map_err(|_| invalid())?;
        let end = end.parse::<u32>().map_err(|_| invalid())?;
        Self::new(start, end).ok_or_else(invalid)
    }
}

impl Display for LineRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Evidence reference parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// Nothing before the colon
    #[error("evidence reference has no path: '{0}'")]
    EmptyPath(String),

    /// Range is not `start-end`
    #[error("invalid line range: '{0}'")]
    InvalidRange(String),
}

/// Distinct file paths referenced by a set of evidence strings
///
/// Strings without a path component are ignored.
#[must_use]
pub fn extract_paths<S: AsRef<str>>(references: &[S]) -> BTreeSet<String> {
    references
        .iter()
        .filter_map(|r| r.as_ref().parse::<EvidenceReference>().ok())
        .map(|r| r.path)
        .collect()
}

/// Group evidence strings by path, collecting the raw ranges seen per path
///
/// A bare path maps to an empty set. Sets are sorted and deduplicated.
#[must_use]
pub fn group_by_path<S: AsRef<str>>(references: &[S]) -> BTreeMap<String, BTreeSet<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for reference in references {
        let reference = match reference.as_ref().parse::<EvidenceReference>() {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("skipping evidence reference: {e}");
                continue;
            }
        };
        let ranges = grouped.entry(reference.path).or_default();
        if let Some(range) = reference.range {
            ranges.insert(range);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parse_path_with_range() {
        let r: EvidenceReference = "src/auth/reset.ts:10-40".parse().unwrap();
        assert_eq!(r.path(), "src/auth/reset.ts");
        assert_eq!(r.raw_range(), Some("10-40"));
        assert_eq!(r.line_range(), LineRange::new(10, 40));
    }

    #[test]
    fn parse_bare_path() {
        let r: EvidenceReference = "c.ts".parse().unwrap();
        assert_eq!(r.path(), "c.ts");
        assert_eq!(r.raw_range(), None);
        assert_eq!(r.to_string(), "c.ts");
    }

    #[test]
    fn path_ends_at_first_colon() {
        let r: EvidenceReference = "a.ts:1-2:extra".parse().unwrap();
        assert_eq!(r.path(), "a.ts");
        assert_eq!(r.raw_range(), Some("1-2:extra"));
        assert_eq!(r.line_range(), None);
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(
            ":1-5".parse::<EvidenceReference>(),
            Err(ReferenceError::EmptyPath(_))
        ));
    }

    #[test]
    fn trailing_colon_means_no_range() {
        let r: EvidenceReference = "a.ts:".parse().unwrap();
        assert_eq!(r.raw_range(), None);
    }

    #[test]
    fn single_line_range() {
        assert_eq!("7".parse::<LineRange>().unwrap(), LineRange { start: 7, end: 7 });
        assert!("9-3".parse::<LineRange>().is_err());
        assert!("0-3".parse::<LineRange>().is_err());
    }

    #[test]
    fn extract_paths_dedupes() {
        let paths = extract_paths(&["a/b.ts:1-5", "a/b.ts:9-9", "c.ts"]);
        let expected: BTreeSet<String> = ["a/b.ts", "c.ts"].into_iter().map(String::from).collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn group_by_path_collects_sorted_ranges() {
        let grouped = group_by_path(&["a.ts:9-9", "a.ts:1-5", "a.ts:1-5", "b.ts"]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped["a.ts"].iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["1-5", "9-9"]
        );
        assert!(grouped["b.ts"].is_empty());
    }

    proptest! {
        #[test]
        fn prop_display_round_trips(
            path in "[a-z]{1,8}(/[a-z]{1,8}){0,3}\\.(rs|ts)",
            start in 1u32..500,
            len in 0u32..50,
        ) {
            let range = LineRange::new(start, start + len).unwrap();
            let reference = EvidenceReference::lines(path.clone(), range);
            let parsed: EvidenceReference = reference.to_string().parse().unwrap();
            prop_assert_eq!(parsed.path(), path.as_str());
            prop_assert_eq!(parsed.line_range(), Some(range));
        }

        #[test]
        fn prop_grouping_never_loses_a_path(
            refs in proptest::collection::vec("[a-c]\\.ts(:[0-9]{1,2}-[0-9]{1,2})?", 0..20)
        ) {
            let grouped = group_by_path(refs.as_slice());
            let paths = extract_paths(refs.as_slice());
            prop_assert_eq!(grouped.keys().cloned().collect::<BTreeSet<_>>(), paths);
        }
    }
}
