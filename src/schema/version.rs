use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::LabelGraphError;

/// Semantic version of a schema definition, ordered by semver precedence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    pub fn with_pre<T: Into<String>>(mut self, pre: T) -> Self {
        self.pre = Some(pre.into());
        self
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::new(0, 0, 0)
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    // Identifiers built through `with_pre` may carry leading zeros.
                    (Ok(n), Ok(m)) => n.cmp(&m).then_with(|| x.cmp(y)),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for SchemaVersion {
    type Err = LabelGraphError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || LabelGraphError::invalid_schema(format!("invalid schema version {text:?}"));
        let (core, pre) = match text.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (text, None),
        };
        if let Some(pre) = pre
            && !pre.split('.').all(is_prerelease_identifier)
        {
            return Err(invalid());
        }
        let mut parts = core.split('.');
        let mut next = || -> Result<u64, LabelGraphError> {
            parts
                .next()
                .filter(|part| is_numeric_identifier(part))
                .and_then(|part| part.parse::<u64>().ok())
                .ok_or_else(invalid)
        };
        let version = SchemaVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
            pre: pre.map(str::to_string),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// ASCII digits without a leading zero, as semver requires of version numbers.
fn is_numeric_identifier(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) && (part == "0" || !part.starts_with('0'))
}

fn is_prerelease_identifier(part: &str) -> bool {
    if part.bytes().all(|b| b.is_ascii_digit()) {
        return is_numeric_identifier(part);
    }
    part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl TryFrom<String> for SchemaVersion {
    type Error = LabelGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> SchemaVersion {
        text.parse().expect("version")
    }

    #[test]
    fn parses_and_prints() {
        assert_eq!(v("1.2.3"), SchemaVersion::new(1, 2, 3));
        assert_eq!(v("1.2.3-rc.1").to_string(), "1.2.3-rc.1");
        for bad in ["1.2", "1.2.3.4", "a.b.c", "1.2.3-", "1.2.3-rc..1"] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_signs_and_leading_zeros() {
        for bad in ["+1.0.0", "1.+2.0", "01.0.0", "1.00.0", "1.0.0-rc.01", "1.0.0-rc.+1", "1.0.0-r c", " 1.0.0"] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "{bad}");
        }
        assert_eq!(v("0.0.0"), SchemaVersion::default());
        assert_eq!(v("10.0.0-0.rc-1.0a"), SchemaVersion::new(10, 0, 0).with_pre("0.rc-1.0a"));
    }

    #[test]
    fn ordering_agrees_with_equality() {
        let padded = SchemaVersion::new(1, 0, 0).with_pre("rc.01");
        let plain = v("1.0.0-rc.1");
        assert_ne!(padded, plain);
        assert_ne!(padded.cmp(&plain), Ordering::Equal);
        assert_eq!(plain.cmp(&plain.clone()), Ordering::Equal);
        assert!(plain < v("1.0.0-rc.2"));
    }

    #[test]
    fn ordering_follows_semver_precedence() {
        let ordered = [
            "0.9.9",
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0",
            "1.0.1",
            "1.10.0",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&v("2.0.1-rc")).unwrap();
        assert_eq!(json, "\"2.0.1-rc\"");
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("2.0.1-rc"));
    }
}
