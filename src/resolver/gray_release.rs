//! Version cohort selection for gray releases.
//!
//! When several versions of a service run side by side, the gray-release
//! policy keeps exactly one cohort: every instance of the oldest version
//! (`old_version`) or of the newest one (`latest_version`). Any other policy
//! leaves the set untouched.

use std::cmp::Ordering;

use semver::Version;

use crate::discovery::ServiceEntry;

/// Gray-release policy carried by the `GrayReleaseConfig` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrayRelease {
    /// No filtering.
    #[default]
    All,
    /// Keep the lowest version cohort.
    OldVersion,
    /// Keep the highest version cohort.
    LatestVersion,
}

impl GrayRelease {
    /// Unknown and empty policy strings mean no filtering.
    pub fn parse(policy: &str) -> Self {
        match policy {
            "old_version" => GrayRelease::OldVersion,
            "latest_version" => GrayRelease::LatestVersion,
            _ => GrayRelease::All,
        }
    }

    /// Reduce `entries` to a single version cohort.
    ///
    /// Entries whose version is not valid semver are dropped while a policy is
    /// active, unless none parse at all, in which case the input is returned
    /// unchanged. Order within the kept cohort follows the input.
    pub fn apply(self, entries: Vec<ServiceEntry>) -> Vec<ServiceEntry> {
        if self == GrayRelease::All || entries.is_empty() {
            return entries;
        }

        let mut versioned: Vec<(Version, ServiceEntry)> = Vec::with_capacity(entries.len());
        let mut unparsed = Vec::new();
        for entry in entries {
            match parse_version(&entry.version) {
                Some(v) => versioned.push((v, entry)),
                None => unparsed.push(entry),
            }
        }
        if versioned.is_empty() {
            tracing::warn!(count = unparsed.len(), "No parseable versions, gray release skipped");
            return unparsed;
        }
        if !unparsed.is_empty() {
            tracing::warn!(
                dropped = ?unparsed.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
                "Dropping instances with invalid versions from gray release cohort"
            );
        }

        // stable sort keeps input order among equal versions
        versioned.sort_by(|(a, _), (b, _)| match self {
            GrayRelease::LatestVersion => b.cmp(a),
            _ => a.cmp(b),
        });

        let reference = versioned[0].0.clone();
        versioned
            .into_iter()
            .take_while(|(v, _)| v.cmp(&reference) == Ordering::Equal)
            .map(|(_, e)| e)
            .collect()
    }
}

/// Accepts an optional leading `v`, e.g. `v1.2.3`.
fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, version: &str) -> ServiceEntry {
        ServiceEntry {
            id: id.into(),
            name: "svc".into(),
            version: version.into(),
            endpoints: vec![format!("grpc://10.0.0.{}:9000", id.len())],
            ..Default::default()
        }
    }

    fn ids(entries: &[ServiceEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    fn mixed() -> Vec<ServiceEntry> {
        vec![entry("a", "1.0.0"), entry("b", "2.0.0"), entry("c", "1.0.0"), entry("d", "2.0.0")]
    }

    #[test]
    fn test_latest_version_keeps_newest_cohort() {
        let out = GrayRelease::parse("latest_version").apply(mixed());
        assert_eq!(ids(&out), vec!["b", "d"]);
    }

    #[test]
    fn test_old_version_keeps_oldest_cohort() {
        let out = GrayRelease::parse("old_version").apply(mixed());
        assert_eq!(ids(&out), vec!["a", "c"]);
    }

    #[test]
    fn test_empty_or_unknown_policy_is_identity() {
        assert_eq!(GrayRelease::parse("").apply(mixed()), mixed());
        assert_eq!(GrayRelease::parse("canary").apply(mixed()), mixed());
    }

    #[test]
    fn test_three_entries_from_two_versions() {
        let input = vec![entry("x", "1.0.0"), entry("y", "1.0.0"), entry("z", "2.0.0")];
        assert_eq!(ids(&GrayRelease::LatestVersion.apply(input.clone())), vec!["z"]);
        assert_eq!(ids(&GrayRelease::OldVersion.apply(input.clone())), vec!["x", "y"]);
        assert_eq!(GrayRelease::All.apply(input.clone()), input);
    }

    #[test]
    fn test_semver_ordering_not_lexicographic() {
        let input = vec![entry("a", "1.9.0"), entry("b", "1.10.0")];
        assert_eq!(ids(&GrayRelease::LatestVersion.apply(input.clone())), vec!["b"]);
        assert_eq!(ids(&GrayRelease::OldVersion.apply(input)), vec!["a"]);
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        let input = vec![entry("a", "2.0.0-rc.1"), entry("b", "2.0.0")];
        assert_eq!(ids(&GrayRelease::LatestVersion.apply(input)), vec!["b"]);
    }

    #[test]
    fn test_v_prefix_is_accepted() {
        let input = vec![entry("a", "v1.0.0"), entry("b", "1.0.0"), entry("c", "v0.9.0")];
        assert_eq!(ids(&GrayRelease::LatestVersion.apply(input)), vec!["a", "b"]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        for policy in [GrayRelease::OldVersion, GrayRelease::LatestVersion] {
            let once = policy.apply(mixed());
            let twice = policy.apply(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(GrayRelease::LatestVersion.apply(Vec::new()).is_empty());
    }

    #[test]
    fn test_invalid_versions() {
        let input = vec![entry("a", "garbage"), entry("b", "1.0.0")];
        assert_eq!(ids(&GrayRelease::OldVersion.apply(input)), vec!["b"]);

        let all_bad = vec![entry("a", "x"), entry("b", "y")];
        assert_eq!(GrayRelease::OldVersion.apply(all_bad.clone()), all_bad);
    }
}
