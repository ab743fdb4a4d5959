//! Archive container for moving whole package trees between machines.
//!
//! Archives are built in memory from a local directory through the
//! [`Runtime`], and expanded either locally ([`tar_gz::unpack`]) or on the
//! remote side by a shell command ([`ArchiveFormat::expand_command`]).

mod tar_gz;
mod zip;

use anyhow::{Context, Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::runtime::Runtime;
use crate::transport::quote;

pub use tar_gz::unpack as unpack_tar_gz;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    TarGz,
    /// Needs `unzip` on the remote host.
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }

    /// Archive every file and directory below `dir`, paths relative to it.
    #[tracing::instrument(skip(self, runtime))]
    pub fn pack<R: Runtime>(&self, runtime: &R, dir: &Path) -> Result<Vec<u8>> {
        let entries = collect_entries(runtime, dir)?;
        log::debug!("Packing {} entries of {:?} as {}", entries.len(), dir, self);
        match self {
            ArchiveFormat::TarGz => tar_gz::pack(runtime, &entries),
            ArchiveFormat::Zip => zip::pack(runtime, &entries),
        }
        .with_context(|| format!("Failed to archive {:?}", dir))
    }

    /// Shell command expanding `archive` into the existing directory `dest`.
    pub fn expand_command(&self, archive: &str, dest: &str) -> String {
        match self {
            ArchiveFormat::TarGz => format!("tar -xzf {} -C {}", quote(archive), quote(dest)),
            ArchiveFormat::Zip => format!("unzip -o -q {} -d {}", quote(archive), quote(dest)),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tar.gz" | "tgz" | "targz" => Ok(ArchiveFormat::TarGz),
            "zip" => Ok(ArchiveFormat::Zip),
            other => bail!("Unsupported archive format '{}'. Expected tar.gz or zip.", other),
        }
    }
}

/// A file or directory to archive.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ArchiveEntry {
    pub path: PathBuf,
    /// Path inside the archive, `/`-separated.
    pub name: String,
    pub is_dir: bool,
    pub mode: u32,
}

/// Every entry below `root`; a directory always precedes its contents.
fn collect_entries<R: Runtime>(runtime: &R, root: &Path) -> Result<Vec<ArchiveEntry>> {
    if !runtime.is_dir(root) {
        bail!("{:?} is not a directory", root);
    }
    let mut entries = Vec::new();
    let mut stack = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, prefix)) = stack.pop() {
        let mut subdirs = Vec::new();
        for path in runtime.read_dir(&dir)? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{}/{}", prefix, file_name)
            };
            let is_dir = runtime.is_dir(&path);
            let mode = runtime.file_mode(&path)?;
            entries.push(ArchiveEntry {
                path: path.clone(),
                name: name.clone(),
                is_dir,
                mode,
            });
            if is_dir {
                subdirs.push((path, name));
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
    Ok(entries)
}
