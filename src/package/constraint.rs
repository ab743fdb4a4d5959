//! Dependency constraints and their normalization.
//!
//! Constraints arrive from three places: package-build manifests,
//! update-request manifests and the `dependencies.json` of published
//! packages. All of them deserialize through [`RawConstraint`], so the
//! "separate `ver` + `operator`" and "operator embedded in `ver`" shapes
//! never leak past this module.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::manifest::validate_path_component;
use super::version::{Operator, satisfies, split_operator};

/// A `(name, version, operator)` triple restricting acceptable versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawConstraint")]
pub struct DependencyConstraint {
    pub name: String,
    #[serde(rename = "ver")]
    pub version: String,
    pub operator: Operator,
}

/// Wire shape accepted for a constraint before normalization.
#[derive(Debug, Deserialize)]
struct RawConstraint {
    name: String,
    #[serde(alias = "version")]
    ver: String,
    #[serde(default)]
    operator: Option<String>,
}

impl TryFrom<RawConstraint> for DependencyConstraint {
    type Error = anyhow::Error;

    fn try_from(raw: RawConstraint) -> Result<Self, Self::Error> {
        match raw.operator.as_deref().map(str::trim) {
            Some(op) if !op.is_empty() => {
                let operator = op
                    .parse::<Operator>()
                    .map_err(|e| anyhow::anyhow!("dependency '{}': {}", raw.name, e))?;
                DependencyConstraint::new(raw.name, raw.ver.trim(), operator)
            }
            _ => DependencyConstraint::parse(raw.name, &raw.ver),
        }
    }
}

impl DependencyConstraint {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        operator: Operator,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let version = version.into();
        if name.trim().is_empty() {
            anyhow::bail!("Dependency name must not be empty");
        }
        validate_path_component("dependency name", &name)?;
        if version.trim().is_empty() {
            anyhow::bail!("Dependency '{}' has an empty version", name);
        }
        Ok(Self {
            name,
            version,
            operator,
        })
    }

    /// Build a constraint from a version string that may embed its operator
    /// (e.g. `">=1.2.0"`). A bare version pins the exact version (`==`).
    pub fn parse(name: impl Into<String>, raw_version: &str) -> anyhow::Result<Self> {
        let (version, operator) = split_operator(raw_version);
        Self::new(name, version, operator.unwrap_or(Operator::Eq))
    }

    /// Whether an already chosen `version` of this package satisfies the constraint.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        satisfies(version, self.operator, &self.version)
    }
}

impl fmt::Display for DependencyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.name, self.operator, self.version)
    }
}

/// Parse the contents of a `dependencies.json` file.
///
/// Empty content and a JSON `null` both mean "no dependencies".
pub fn parse_dependency_list(content: &str) -> anyhow::Result<Vec<DependencyConstraint>> {
    let content = content.trim();
    if content.is_empty() {
        return Ok(Vec::new());
    }
    let list: Option<Vec<DependencyConstraint>> = serde_json::from_str(content)?;
    Ok(list.unwrap_or_default())
}
