//! Transitive dependency resolution.
//!
//! Breadth-first closure over a FIFO work queue. The first constraint seen
//! for a package selects its greatest satisfying version; every later
//! constraint on that package is only checked against the selection, never
//! used to re-select. Each package is therefore selected at most once,
//! which bounds the work and makes cycles (including a package depending
//! on itself) harmless.

use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::accessor::{VersionSource, find_suitable_versions};
use crate::package::DependencyConstraint;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Requirer name used for the constraints the caller asked for.
pub const ROOT_REQUIRER: &str = "the update manifest";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("package '{name}' (required by {required_by}) was not found: {source}")]
    NotFound {
        name: String,
        required_by: String,
        #[source]
        source: BoxError,
    },
    #[error("no suitable version for '{name}' matching {constraint} (required by {required_by})")]
    NoSuitableVersion {
        name: String,
        constraint: String,
        required_by: String,
    },
    #[error(
        "conflicting constraints on '{name}': {selected} was selected for {selected_by}, \
         but {required_by} requires {required}"
    )]
    Conflict {
        name: String,
        selected: String,
        selected_by: String,
        required: String,
        required_by: String,
    },
    #[error("failed to read dependencies of {name} {version}: {source}")]
    Manifest {
        name: String,
        version: String,
        #[source]
        source: BoxError,
    },
}

/// One package of a resolution, with the constraint that selected it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub constraint: DependencyConstraint,
    pub required_by: String,
    pub dependencies: Vec<DependencyConstraint>,
}

/// Selected packages in the order they were selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub packages: Vec<ResolvedPackage>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// `(name, version)` pairs in selection order.
    pub fn selected(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packages
            .iter()
            .map(|p| (p.name.as_str(), p.version.as_str()))
    }
}

struct Pending {
    constraint: DependencyConstraint,
    required_by: String,
}

pub struct Resolver<'a> {
    source: &'a dyn VersionSource,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn VersionSource) -> Self {
        Self { source }
    }

    #[tracing::instrument(skip(self, roots))]
    pub async fn resolve(&self, roots: &[DependencyConstraint]) -> Result<Resolution, ResolveError> {
        let mut queue: VecDeque<Pending> = roots
            .iter()
            .map(|constraint| Pending {
                constraint: constraint.clone(),
                required_by: ROOT_REQUIRER.to_string(),
            })
            .collect();
        let mut selected: HashMap<String, usize> = HashMap::new();
        let mut packages: Vec<ResolvedPackage> = Vec::new();

        while let Some(Pending {
            constraint,
            required_by,
        }) = queue.pop_front()
        {
            if let Some(&index) = selected.get(&constraint.name) {
                let existing = &packages[index];
                if constraint.is_satisfied_by(&existing.version) {
                    debug!(
                        "{} {} already satisfies {} (from {})",
                        existing.name, existing.version, constraint, required_by
                    );
                    continue;
                }
                return Err(ResolveError::Conflict {
                    name: constraint.name.clone(),
                    selected: existing.version.clone(),
                    selected_by: existing.required_by.clone(),
                    required: format!("{}{}", constraint.operator, constraint.version),
                    required_by,
                });
            }

            let package = self.select(constraint, required_by).await?;
            selected.insert(package.name.clone(), packages.len());
            packages.push(package);

            let package = &packages[packages.len() - 1];
            let requirer = format!("{} {}", package.name, package.version);
            for dependency in &package.dependencies {
                let already_satisfied = selected
                    .get(&dependency.name)
                    .is_some_and(|&i| dependency.is_satisfied_by(&packages[i].version));
                if !already_satisfied {
                    queue.push_back(Pending {
                        constraint: dependency.clone(),
                        required_by: requirer.clone(),
                    });
                }
            }
        }

        info!("Resolved {} package(s)", packages.len());
        Ok(Resolution { packages })
    }

    async fn select(
        &self,
        constraint: DependencyConstraint,
        required_by: String,
    ) -> Result<ResolvedPackage, ResolveError> {
        let name = constraint.name.clone();
        let candidates = find_suitable_versions(
            self.source,
            &name,
            &constraint.version,
            constraint.operator,
        )
        .await
        .map_err(|e| ResolveError::NotFound {
            name: name.clone(),
            required_by: required_by.clone(),
            source: e.into(),
        })?;

        let Some(version) = candidates.into_iter().next() else {
            return Err(ResolveError::NoSuitableVersion {
                name,
                constraint: format!("{}{}", constraint.operator, constraint.version),
                required_by,
            });
        };

        let dependencies = self
            .source
            .read_dependencies(&name, &version)
            .await
            .map_err(|e| ResolveError::Manifest {
                name: name.clone(),
                version: version.clone(),
                source: e.into(),
            })?;

        debug!("Selected {} {} for {}", name, version, required_by);
        Ok(ResolvedPackage {
            name,
            version,
            constraint,
            required_by,
            dependencies,
        })
    }
}
