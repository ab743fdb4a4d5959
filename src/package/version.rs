//! Version comparison and constraint operators.
//!
//! Versions follow semantic-version precedence. Parsing is lenient the way
//! package authors actually write versions: a leading `v` is ignored and
//! missing minor/patch components are filled with zero (`v1.2` is `1.2.0`).
//! Strings that still fail to parse are never fatal; they simply never
//! satisfy any constraint.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;

/// Comparison operator of a dependency constraint.
///
/// `==` and `=` are both equality; the spelling is kept so a manifest
/// round-trips exactly as it was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
}

impl Operator {
    /// Prefix match order: two-character operators come first so that
    /// `>=1.0.0` is never read as `>` followed by `=1.0.0`.
    const BY_PREFIX: [Operator; 6] = [
        Operator::Eq,
        Operator::Ge,
        Operator::Le,
        Operator::Assign,
        Operator::Gt,
        Operator::Lt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Assign => "=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
        }
    }

    /// Whether an ordering of `candidate` against `target` passes this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq | Operator::Assign => ordering == Ordering::Equal,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Lt => ordering == Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::BY_PREFIX
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown version operator '{}'. Expected one of ==, =, >=, <=, >, <.",
                    s
                )
            })
    }
}

/// Split an embedded operator prefix off a version string.
///
/// Uses longest-prefix match, so `">=1.2.0"` yields `("1.2.0", Some(Ge))`.
/// A string without a recognised prefix is returned unchanged with `None`.
pub fn split_operator(raw: &str) -> (&str, Option<Operator>) {
    let raw = raw.trim();
    for op in Operator::BY_PREFIX {
        if let Some(rest) = raw.strip_prefix(op.as_str()) {
            return (rest.trim_start(), Some(op));
        }
    }
    (raw, None)
}

/// Parse a version string leniently.
///
/// Returns `None` when the string is not a usable version.
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix('v')
        .or_else(|| raw.strip_prefix('V'))
        .unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }

    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    // Pad "1" / "1.2" (optionally followed by -pre or +build) to three components.
    let split_at = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split_at);
    let components = core.split('.').count();
    if components >= 3 || !core.split('.').all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let padded = format!("{}{}{}", core, ".0".repeat(3 - components), suffix);
    Version::parse(&padded).ok()
}

/// Compare two versions by semantic-version precedence.
///
/// Build metadata is used only as a final tie-break, which keeps the order
/// total. Returns `None` if either side does not parse.
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Whether `candidate` satisfies `operator target`.
///
/// Unparseable versions never satisfy anything.
pub fn satisfies(candidate: &str, operator: Operator, target: &str) -> bool {
    compare(candidate, target).is_some_and(|ordering| operator.accepts(ordering))
}
