//! Copying manifest targets into a version directory.

use anyhow::{Context, Result};
use glob::Pattern;
use log::{debug, warn};
use std::path::{Component, Path, PathBuf};

use crate::package::Target;
use crate::runtime::Runtime;

pub(super) struct TargetCopier<'a, R: Runtime> {
    runtime: &'a R,
    source_root: &'a Path,
    dest: &'a Path,
}

impl<'a, R: Runtime> TargetCopier<'a, R> {
    pub(super) fn new(runtime: &'a R, source_root: &'a Path, dest: &'a Path) -> Self {
        Self {
            runtime,
            source_root,
            dest,
        }
    }

    /// Copy every match of the target's glob into the destination under its
    /// base name. Returns the number of files copied.
    pub(super) fn copy_target(&self, target: &Target) -> Result<usize> {
        let excludes = compile_excludes(target);
        let pattern = self.source_root.join(&target.path);
        let matches = self.runtime.glob(&pattern.to_string_lossy())?;
        if matches.is_empty() {
            warn!("Target '{}' matched no files", target.path);
        }

        let mut files = 0;
        for source in matches {
            let Some(name) = source.file_name() else {
                continue;
            };
            if is_excluded(&excludes, &name.to_string_lossy()) {
                debug!("Excluded {:?}", source);
                continue;
            }
            files += self.copy_entry(&source, &self.dest.join(name), &excludes)?;
        }
        Ok(files)
    }

    fn copy_entry(&self, source: &Path, dest: &Path, excludes: &[Pattern]) -> Result<usize> {
        if !self.runtime.is_dir(source) {
            self.runtime
                .copy(source, dest)
                .with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))?;
            return Ok(1);
        }

        // A directory holding the destination would be copied into itself.
        if normalized(self.dest).starts_with(normalized(source)) {
            debug!("Skipping {:?}: it contains the package directory", source);
            return Ok(0);
        }

        self.runtime
            .create_dir_all(dest)
            .with_context(|| format!("Failed to create directory {:?}", dest))?;
        let mut files = 0;
        for entry in self.runtime.read_dir(source)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if is_excluded(excludes, &name.to_string_lossy()) {
                debug!("Excluded {:?}", entry);
                continue;
            }
            files += self.copy_entry(&entry, &dest.join(name), excludes)?;
        }
        Ok(files)
    }
}

fn compile_excludes(target: &Target) -> Vec<Pattern> {
    target
        .exclude_patterns()
        .into_iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Ignoring invalid exclude pattern '{}': {}", raw, e);
                None
            }
        })
        .collect()
}

fn is_excluded(excludes: &[Pattern], file_name: &str) -> bool {
    excludes.iter().any(|pattern| pattern.matches(file_name))
}

fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
