//! Version constraint parsing and evaluation.
//!
//! A constraint is a conjunction of comparators. The surface syntax (caret,
//! tilde, wildcard, ranges) desugars into `>=`/`<`/`=` comparators at parse
//! time, so evaluation is a single pass over the comparator list.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;
use crate::version::{PartialVersion, Version, VersionParser};

/// Comparison operator of a single comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

/// One `op version` clause of a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    fn matches_precedence(&self, candidate: &Version) -> bool {
        let ord = candidate.cmp_precedence(&self.version);
        match self.op {
            Op::Exact => ord.is_eq(),
            Op::Greater => ord.is_gt(),
            Op::GreaterEq => ord.is_ge(),
            Op::Less => ord.is_lt(),
            Op::LessEq => ord.is_le(),
        }
    }
}

/// A parsed constraint: AND of comparators, with the original text kept for
/// display and serialization.
///
/// An empty comparator list is the `*` wildcard and matches every release
/// version.
#[derive(Debug, Clone)]
pub struct Constraint {
    comparators: Vec<Comparator>,
    source: String,
}

impl Constraint {
    /// Parse a constraint expression.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed_end = input.trim_end();
        let mut parser = VersionParser::new(trimmed_end);
        let mut comparators = Vec::new();
        let mut any = false;

        loop {
            while matches!(parser.peek(), Some(c) if c.is_whitespace()) {
                parser.bump();
            }
            if parser.peek().is_none() {
                break;
            }
            parse_clause(&mut parser, &mut comparators)?;
            any = true;
        }

        if !any {
            return Err(ParseError::new(0, "version constraint"));
        }

        Ok(Self {
            comparators,
            source: input.trim().to_string(),
        })
    }

    /// The `*` wildcard constraint.
    pub fn any() -> Self {
        Self {
            comparators: Vec::new(),
            source: "*".to_string(),
        }
    }

    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    /// Whether `candidate` satisfies this constraint.
    ///
    /// Prerelease candidates are matched strictly: every comparator must
    /// hold by precedence, and additionally some comparator operand must be
    /// a prerelease on the same major.minor.patch triple. Build metadata is
    /// ignored throughout.
    pub fn matches(&self, candidate: &Version) -> bool {
        if !self
            .comparators
            .iter()
            .all(|c| c.matches_precedence(candidate))
        {
            return false;
        }
        if candidate.is_prerelease() {
            return self
                .comparators
                .iter()
                .any(|c| c.version.is_prerelease() && c.version.same_triple(candidate));
        }
        true
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.comparators == other.comparators
    }
}

impl Eq for Constraint {}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Constraint {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Constraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

fn parse_clause(
    parser: &mut VersionParser<'_>,
    out: &mut Vec<Comparator>,
) -> Result<(), ParseError> {
    // Bare `*` matches everything; it contributes no comparator.
    if parser.eat('*') {
        return Ok(());
    }

    if parser.eat('^') {
        let start = parser.pos;
        let partial = parser.partial_version()?;
        if partial.wildcard {
            return Err(ParseError::new(start, "version after `^`"));
        }
        desugar_caret(&partial, out);
        return Ok(());
    }

    if parser.eat('~') {
        let start = parser.pos;
        let partial = parser.partial_version()?;
        if partial.wildcard {
            return Err(ParseError::new(start, "version after `~`"));
        }
        desugar_tilde(&partial, out);
        return Ok(());
    }

    let op = if parser.eat('>') {
        if parser.eat('=') {
            Some(Op::GreaterEq)
        } else {
            Some(Op::Greater)
        }
    } else if parser.eat('<') {
        if parser.eat('=') {
            Some(Op::LessEq)
        } else {
            Some(Op::Less)
        }
    } else if parser.eat('=') {
        Some(Op::Exact)
    } else {
        None
    };

    let start = parser.pos;
    let partial = parser.partial_version()?;

    match op {
        Some(Op::Exact) | None => {
            if partial.is_full() {
                out.push(Comparator {
                    op: Op::Exact,
                    version: partial.floor(),
                });
            } else {
                // `1.2.*`, `1.*` and their bare forms are half-open ranges.
                desugar_wildcard(&partial, out);
            }
        }
        Some(op) => {
            // Relational comparators require a complete operand.
            if !partial.is_full() {
                return Err(ParseError::new(start, "full version after comparison operator"));
            }
            out.push(Comparator {
                op,
                version: partial.floor(),
            });
        }
    }
    Ok(())
}

fn desugar_wildcard(partial: &PartialVersion, out: &mut Vec<Comparator>) {
    out.push(Comparator {
        op: Op::GreaterEq,
        version: partial.floor(),
    });
    let upper = match partial.minor {
        Some(minor) => Version::new(partial.major, minor + 1, 0),
        None => Version::new(partial.major + 1, 0, 0),
    };
    out.push(Comparator {
        op: Op::Less,
        version: upper,
    });
}

fn desugar_caret(partial: &PartialVersion, out: &mut Vec<Comparator>) {
    out.push(Comparator {
        op: Op::GreaterEq,
        version: partial.floor(),
    });
    let upper = if partial.major > 0 {
        Version::new(partial.major + 1, 0, 0)
    } else {
        match (partial.minor, partial.patch) {
            (None, _) => Version::new(1, 0, 0),
            (Some(minor), _) if minor > 0 => Version::new(0, minor + 1, 0),
            (Some(_), None) => Version::new(0, 1, 0),
            // `^0.0.3` admits patch-level bugfixes only.
            (Some(_), Some(patch)) => Version::new(0, 0, patch + 1),
        }
    };
    out.push(Comparator {
        op: Op::Less,
        version: upper,
    });
}

fn desugar_tilde(partial: &PartialVersion, out: &mut Vec<Comparator>) {
    out.push(Comparator {
        op: Op::GreaterEq,
        version: partial.floor(),
    });
    let upper = match partial.minor {
        Some(minor) => Version::new(partial.major, minor + 1, 0),
        None => Version::new(partial.major + 1, 0, 0),
    };
    out.push(Comparator {
        op: Op::Less,
        version: upper,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> Constraint {
        Constraint::parse(s).unwrap()
    }

    #[track_caller]
    fn assert_matches(constraint: &str, version: &str) {
        assert!(
            c(constraint).matches(&v(version)),
            "{version} should satisfy {constraint}"
        );
    }

    #[track_caller]
    fn assert_rejects(constraint: &str, version: &str) {
        assert!(
            !c(constraint).matches(&v(version)),
            "{version} should not satisfy {constraint}"
        );
    }

    #[test]
    fn exact_constraints() {
        assert_matches("1.2.3", "1.2.3");
        assert_matches("=1.2.3", "1.2.3");
        assert_rejects("1.2.3", "1.2.4");
        assert_matches("1.2.3", "1.2.3+build.9");
    }

    #[test]
    fn combined_ranges() {
        assert_matches(">=1.0.0 <2.0.0", "1.5.0");
        assert_matches(">=1.0.0 <2.0.0", "1.0.0");
        assert_rejects(">=1.0.0 <2.0.0", "2.0.0");
        assert_rejects(">=1.0.0 <2.0.0", "0.9.9");
        assert_matches(">1.0.0 <=1.2.0", "1.2.0");
        assert_rejects(">1.0.0 <=1.2.0", "1.0.0");
    }

    #[test]
    fn caret_ranges() {
        assert_matches("^1.2.3", "1.2.3");
        assert_matches("^1.2.3", "1.9.0");
        assert_rejects("^1.2.3", "2.0.0");
        assert_rejects("^1.2.3", "1.2.2");
    }

    #[test]
    fn caret_zero_major() {
        assert_matches("^0.2.3", "0.2.3");
        assert_matches("^0.2.3", "0.2.9");
        assert_rejects("^0.2.3", "0.3.0");
    }

    #[test]
    fn caret_zero_minor_is_patch_only() {
        assert_matches("^0.0.3", "0.0.3");
        assert_rejects("^0.0.3", "0.0.4");
        assert_rejects("^0.0.3", "0.1.0");
    }

    #[test]
    fn tilde_ranges() {
        assert_matches("~1.2.3", "1.2.3");
        assert_matches("~1.2.3", "1.2.9");
        assert_rejects("~1.2.3", "1.3.0");
        assert_rejects("~1.2.3", "1.2.2");
    }

    #[test]
    fn wildcards() {
        assert_matches("*", "0.0.1");
        assert_matches("*", "42.0.0");
        assert_matches("1.*", "1.0.0");
        assert_matches("1.*", "1.99.3");
        assert_rejects("1.*", "2.0.0");
        assert_matches("1.2.*", "1.2.7");
        assert_rejects("1.2.*", "1.3.0");
    }

    #[test]
    fn prerelease_is_strict() {
        assert_matches(">=1.0.0-alpha", "1.0.0-beta");
        assert_rejects(">=1.0.0", "1.0.0-beta");
        assert_rejects(">=1.0.0", "1.1.0-beta");
        assert_matches(">=1.0.0-alpha", "1.0.0");
        assert_matches(">=1.0.0-alpha", "1.5.0");
        assert_rejects(">=1.0.0-alpha", "1.5.0-beta");
        assert_matches("=1.2.3-rc.1", "1.2.3-rc.1");
        assert_rejects("*", "1.0.0-alpha");
    }

    #[test]
    fn caret_never_admits_foreign_prereleases() {
        assert_rejects("^1.2.3", "2.0.0-alpha");
        assert_matches("^1.2.3-alpha", "1.2.3-beta");
        assert_rejects("^1.2.3-alpha", "1.3.0-beta");
    }

    #[test]
    fn parse_errors_carry_offsets() {
        assert_eq!(Constraint::parse("").unwrap_err().offset, 0);
        assert_eq!(Constraint::parse(">=").unwrap_err().offset, 2);
        let err = Constraint::parse(">=1.2").unwrap_err();
        assert_eq!(err.expected, "full version after comparison operator");
        assert!(Constraint::parse("abc").is_err());
    }

    #[test]
    fn display_keeps_source_text() {
        assert_eq!(c(">=1.0.0 <2.0.0").to_string(), ">=1.0.0 <2.0.0");
        assert_eq!(c("^1.2.3").to_string(), "^1.2.3");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let constraint = c("^1.4.0");
        let version = v("1.6.2");
        let first = constraint.matches(&version);
        for _ in 0..10 {
            assert_eq!(constraint.matches(&version), first);
        }
    }
}
