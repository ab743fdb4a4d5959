//! Repository accessor: what versions of a package exist, and what each
//! version declares as its dependencies.
//!
//! The resolver and the builder only see a [`VersionSource`]; whether the
//! repository lives on the local disk ([`LocalSource`]) or behind a remote
//! transport ([`RemoteSource`]) is decided by whoever constructs it.

mod local;
mod remote;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::package::DependencyConstraint;
use crate::package::version::{Operator, compare, satisfies};

pub use local::LocalSource;
pub use remote::RemoteSource;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Version directory names present for `name`.
    ///
    /// Fails when the package cannot be enumerated at all; an installed
    /// package with no matching versions is an empty list.
    async fn list_versions(&self, name: &str) -> Result<Vec<String>>;

    /// Dependencies declared by one version; a missing manifest means none.
    async fn read_dependencies(&self, name: &str, version: &str) -> Result<Vec<DependencyConstraint>>;

    /// Where the versions come from, for messages.
    fn describe(&self) -> String;
}

/// Versions of `name` satisfying `operator target`, greatest first.
///
/// Versions with equal precedence (`1.2` and `1.2.0`) collapse to one entry
/// so the result is strictly descending.
#[tracing::instrument(skip(source))]
pub async fn find_suitable_versions(
    source: &dyn VersionSource,
    name: &str,
    target: &str,
    operator: Operator,
) -> Result<Vec<String>> {
    let mut versions: Vec<String> = source
        .list_versions(name)
        .await?
        .into_iter()
        .filter(|candidate| satisfies(candidate, operator, target))
        .collect();

    versions.sort_by(|a, b| {
        compare(b, a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.cmp(a))
    });
    versions.dedup_by(|later, earlier| compare(later, earlier) == Some(Ordering::Equal));

    log::debug!(
        "{} {}{} in {}: {:?}",
        name,
        operator,
        target,
        source.describe(),
        versions
    );
    Ok(versions)
}
