use std::{cmp::Ordering, fmt, hash::Hash, str::FromStr};

use crate::Error;

/// A semantic version, `major.minor.patch[-prerelease][+build]`.
///
/// Ordering and equality follow semantic versioning precedence: a pre-release sorts before the
/// release it precedes, pre-release identifiers compare numerically when both are numeric and
/// lexically otherwise, and build metadata is ignored.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    /// Major version
    pub major: u64,
    /// Minor version
    pub minor: u64,
    /// Patch version
    pub patch: u64,
    /// Pre-release tag without the leading `-`
    pub prerelease: Option<String>,
    /// Build metadata without the leading `+`
    pub build: Option<String>,
}

impl SemanticVersion {
    /// A release version.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        SemanticVersion {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// The version of this crate.
    #[must_use]
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(SemanticVersion::new(0, 0, 0))
    }

    /// `true` if this is a pre-release.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

fn compare_prerelease(left: &str, right: &str) -> Ordering {
    let mut left_parts = left.split('.');
    let mut right_parts = right.split('.');
    loop {
        match (left_parts.next(), right_parts.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => compare_prerelease(l, r),
            })
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl Hash for SemanticVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(prerelease) = &self.prerelease {
            write!(f, "-{prerelease}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

fn valid_identifiers(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

impl FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Error(format!("Invalid semantic version '{text}'"));

        let (rest, build) = match text.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (text, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, prerelease)) => (core, Some(prerelease)),
            None => (rest, None),
        };

        let mut numbers = core.split('.').map(|part| part.parse::<u64>().map_err(|_| invalid()));
        let major = numbers.next().ok_or_else(invalid)??;
        let minor = numbers.next().ok_or_else(invalid)??;
        let patch = numbers.next().transpose()?.unwrap_or(0);
        if numbers.next().is_some() {
            return Err(invalid());
        }

        for part in prerelease.iter().chain(build.iter()) {
            if !valid_identifiers(part) {
                return Err(invalid());
            }
        }

        Ok(SemanticVersion {
            major,
            minor,
            patch,
            prerelease: prerelease.map(str::to_string),
            build: build.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> SemanticVersion {
        text.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(v("2.5.3").to_string(), "2.5.3");
        assert_eq!(v("3.0").to_string(), "3.0.0");
        assert_eq!(v("3.0.0-beta.2+linux").to_string(), "3.0.0-beta.2+linux");
        assert!("3".parse::<SemanticVersion>().is_err());
        assert!("3.0.0.1".parse::<SemanticVersion>().is_err());
        assert!("3.0.0-".parse::<SemanticVersion>().is_err());
        assert!("a.b.c".parse::<SemanticVersion>().is_err());
    }

    #[test]
    fn precedence() {
        let ordered = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
            "1.0.1",
            "1.2.0",
            "2.0.0",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
    }

    #[test]
    fn crate_version_parses() {
        assert_eq!(SemanticVersion::current().to_string(), env!("CARGO_PKG_VERSION"));
    }
}
