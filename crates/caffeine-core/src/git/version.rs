//! Release tag ordering
//!
//! Unpinned plugins follow the newest release tag. Only plain numeric versions
//! count (`v1.2.3`, `2.0`); pre-releases and arbitrary tag names are ignored.

use std::cmp::Ordering;

/// Numeric version parsed from a release tag. Missing components count as
/// zero, so `1.0` equals `1.0.0`.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    parts: Vec<u64>,
}

impl ReleaseVersion {
    pub fn parse(tag: &str) -> Option<Self> {
        let trimmed = tag.trim();
        let version = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let mut parts = Vec::new();
        for part in version.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            parts.push(part.parse().ok()?);
        }

        if parts.is_empty() || parts.len() > 4 {
            return None;
        }
        Some(Self { parts })
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Newest release tag among `tags`, if any parse as a release
pub fn latest_release_tag<'a, I>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter_map(|tag| ReleaseVersion::parse(tag).map(|version| (version, tag)))
        .max_by(|(a, tag_a), (b, tag_b)| a.cmp(b).then_with(|| tag_a.cmp(tag_b)))
        .map(|(_, tag)| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert!(ReleaseVersion::parse("v1.2.3").is_some());
        assert!(ReleaseVersion::parse("2.0").is_some());
        assert!(ReleaseVersion::parse("v1.0.0-rc1").is_none());
        assert!(ReleaseVersion::parse("1.0a1").is_none());
        assert!(ReleaseVersion::parse("latest").is_none());
        assert!(ReleaseVersion::parse("").is_none());
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let a = ReleaseVersion::parse("v1.10.0").unwrap();
        let b = ReleaseVersion::parse("v1.9.3").unwrap();
        assert!(a > b);
        assert_eq!(
            ReleaseVersion::parse("1.0").unwrap(),
            ReleaseVersion::parse("1.0.0").unwrap()
        );
    }

    #[test]
    fn test_trailing_zeros_are_equal() {
        let short = ReleaseVersion::parse("v2").unwrap();
        let long = ReleaseVersion::parse("2.0.0.0").unwrap();
        assert_eq!(short, long);
        assert_eq!(short.cmp(&long), Ordering::Equal);
        assert_ne!(short, ReleaseVersion::parse("2.0.1").unwrap());
    }

    #[test]
    fn test_latest_release_tag() {
        let tags = ["v1.0.0", "v1.10.0", "v2.0.0-beta", "nightly", "v1.9.9"];
        assert_eq!(latest_release_tag(tags), Some("v1.10.0".to_string()));
        assert_eq!(latest_release_tag(["nightly"]), None);
        assert_eq!(latest_release_tag(Vec::<&str>::new()), None);
    }
}
