//! Semantic version parsing and ordering (semver 2.0.0).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;

/// A single dot-separated prerelease identifier.
///
/// Numeric identifiers order numerically and below every alphanumeric
/// identifier, per the semver precedence rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{n}"),
            Identifier::Alpha(s) => f.write_str(s),
        }
    }
}

impl Identifier {
    fn cmp_precedence(&self, other: &Identifier) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
            (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::Alpha(a), Identifier::Alpha(b)) => a.cmp(b),
        }
    }
}

/// A semver 2.0.0 version: `major.minor.patch[-pre][+build]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<Identifier>,
    pub build: Vec<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
            build: Vec::new(),
        }
    }

    /// Parse a version string. Wrapper around the `FromStr` impl so call
    /// sites read `Version::parse("1.2.3")`.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        input.parse()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// True when `self` and `other` share the same major.minor.patch triple.
    pub fn same_triple(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor && self.patch == other.patch
    }

    /// Semver precedence: triple, then prerelease (absence ranks above
    /// presence), with build metadata ignored entirely.
    pub fn cmp_precedence(&self, other: &Version) -> Ordering {
        let triple = self
            .major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch));
        if triple != Ordering::Equal {
            return triple;
        }
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                for (a, b) in self.pre.iter().zip(other.pre.iter()) {
                    let ord = a.cmp_precedence(b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                // Longer prerelease lists rank higher when the shared prefix
                // is equal.
                self.pre.len().cmp(&other.pre.len())
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Precedence first; build metadata only breaks ties so that the
        // total order stays consistent with `Eq`.
        self.cmp_precedence(other).then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-")?;
            for (i, id) in self.pre.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{id}")?;
            }
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parser = VersionParser::new(input);
        let version = parser.version()?;
        parser.expect_end()?;
        Ok(version)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Offset-tracking cursor shared by the version and constraint parsers.
pub(crate) struct VersionParser<'a> {
    input: &'a str,
    pub(crate) pos: usize,
}

impl<'a> VersionParser<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos == self.input.len() {
            Ok(())
        } else {
            Err(ParseError::new(self.pos, "end of input"))
        }
    }

    fn numeric_component(&mut self) -> Result<u64, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(ParseError::new(start, "numeric version component"));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(ParseError::new(start, "component without leading zero"));
        }
        digits
            .parse()
            .map_err(|_| ParseError::new(start, "numeric component within u64 range"))
    }

    fn identifier(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-') {
            self.bump();
        }
        if self.pos == start {
            return Err(ParseError::new(start, "alphanumeric identifier"));
        }
        Ok(&self.input[start..self.pos])
    }

    fn prerelease_identifier(&mut self) -> Result<Identifier, ParseError> {
        let start = self.pos;
        let raw = self.identifier()?;
        if raw.chars().all(|c| c.is_ascii_digit()) {
            if raw.len() > 1 && raw.starts_with('0') {
                return Err(ParseError::new(start, "identifier without leading zero"));
            }
            raw.parse()
                .map(Identifier::Numeric)
                .map_err(|_| ParseError::new(start, "numeric identifier within u64 range"))
        } else {
            Ok(Identifier::Alpha(raw.to_string()))
        }
    }

    /// Parse a full `major.minor.patch[-pre][+build]` version at the cursor.
    pub(crate) fn version(&mut self) -> Result<Version, ParseError> {
        let major = self.numeric_component()?;
        if !self.eat('.') {
            return Err(ParseError::new(self.pos, "`.`"));
        }
        let minor = self.numeric_component()?;
        if !self.eat('.') {
            return Err(ParseError::new(self.pos, "`.`"));
        }
        let patch = self.numeric_component()?;

        let mut pre = Vec::new();
        if self.eat('-') {
            loop {
                pre.push(self.prerelease_identifier()?);
                if !self.eat('.') {
                    break;
                }
            }
        }

        let mut build = Vec::new();
        if self.eat('+') {
            loop {
                build.push(self.identifier()?.to_string());
                if !self.eat('.') {
                    break;
                }
            }
        }

        Ok(Version {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }

    /// Parse the leading `major[.minor[.patch]]` of a constraint operand,
    /// where trailing components may be omitted or given as `*`/`x`.
    pub(crate) fn partial_version(&mut self) -> Result<PartialVersion, ParseError> {
        let major = self.numeric_component()?;
        let mut minor = None;
        let mut patch = None;
        let mut wildcard = false;

        if self.eat('.') {
            if self.eat('*') || self.eat('x') {
                wildcard = true;
            } else {
                minor = Some(self.numeric_component()?);
                if self.eat('.') {
                    if self.eat('*') || self.eat('x') {
                        wildcard = true;
                    } else {
                        patch = Some(self.numeric_component()?);
                    }
                }
            }
        }

        let mut pre = Vec::new();
        if patch.is_some() && self.eat('-') {
            loop {
                pre.push(self.prerelease_identifier()?);
                if !self.eat('.') {
                    break;
                }
            }
        }

        Ok(PartialVersion {
            major,
            minor,
            patch,
            pre,
            wildcard,
        })
    }
}

/// A possibly-incomplete version as written in a constraint operand.
pub(crate) struct PartialVersion {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Vec<Identifier>,
    pub wildcard: bool,
}

impl PartialVersion {
    pub(crate) fn floor(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: Vec::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.minor.is_some() && self.patch.is_some() && !self.wildcard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_plain_versions() {
        let parsed = v("1.2.3");
        assert_eq!(parsed.major, 1);
        assert_eq!(parsed.minor, 2);
        assert_eq!(parsed.patch, 3);
        assert!(parsed.pre.is_empty());
        assert!(parsed.build.is_empty());
    }

    #[test]
    fn parses_prerelease_and_build() {
        let parsed = v("1.0.0-alpha.1+build.42");
        assert_eq!(
            parsed.pre,
            vec![
                Identifier::Alpha("alpha".into()),
                Identifier::Numeric(1)
            ]
        );
        assert_eq!(parsed.build, vec!["build".to_string(), "42".to_string()]);
    }

    #[test]
    fn rejects_malformed_versions() {
        for (input, offset) in [
            ("", 0),
            ("1", 1),
            ("1.2", 3),
            ("1.2.", 4),
            ("01.2.3", 0),
            ("1.2.3-", 6),
            ("1.2.3-alpha..1", 12),
            ("1.2.3 ", 5),
        ] {
            let err = Version::parse(input).unwrap_err();
            assert_eq!(err.offset, offset, "input {input:?}");
        }
    }

    #[test]
    fn precedence_follows_semver() {
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
            "1.1.0",
            "2.0.0",
        ];
        for pair in ordered.windows(2) {
            assert!(
                v(pair[0]).cmp_precedence(&v(pair[1])) == std::cmp::Ordering::Less,
                "{} should precede {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn build_metadata_ignored_by_precedence() {
        assert_eq!(
            v("1.2.3+linux").cmp_precedence(&v("1.2.3+macos")),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn display_round_trips() {
        for s in ["0.1.0", "1.2.3-rc.1", "2.0.0-alpha.1+sha.5114f85", "10.20.30"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    proptest! {
        #[test]
        fn parse_display_round_trip(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let version = Version::new(major, minor, patch);
            prop_assert_eq!(Version::parse(&version.to_string()).unwrap(), version);
        }

        #[test]
        fn precedence_is_transitive(
            a in "[0-9]{1}\\.[0-9]{1}\\.[0-9]{1}",
            b in "[0-9]{1}\\.[0-9]{1}\\.[0-9]{1}",
            c in "[0-9]{1}\\.[0-9]{1}\\.[0-9]{1}",
        ) {
            let (a, b, c) = (v(&a), v(&b), v(&c));
            let mut sorted = vec![a.clone(), b.clone(), c.clone()];
            sorted.sort();
            prop_assert!(sorted[0].cmp_precedence(&sorted[2]) != std::cmp::Ordering::Greater);
        }
    }
}
