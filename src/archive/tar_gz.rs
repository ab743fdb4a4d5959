use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::debug;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};

use super::ArchiveEntry;
use crate::runtime::Runtime;

pub(super) fn pack<R: Runtime>(runtime: &R, entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(0);
        if entry.is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &entry.name, std::io::empty())
                .with_context(|| format!("Failed to add directory {}", entry.name))?;
        } else {
            let mut content = Vec::new();
            runtime
                .open(&entry.path)?
                .read_to_end(&mut content)
                .with_context(|| format!("Failed to read {:?}", entry.path))?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(content.len() as u64);
            builder
                .append_data(&mut header, &entry.name, content.as_slice())
                .with_context(|| format!("Failed to add file {}", entry.name))?;
        }
    }

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish gzip stream")
}

/// Expand a tar.gz archive into `dest`, merging with what is already there.
///
/// Entries escaping `dest` (absolute or `..`) and anything that is neither
/// a regular file nor a directory are skipped. Returns the number of files
/// written.
#[tracing::instrument(skip(runtime, bytes))]
pub fn unpack<R: Runtime>(runtime: &R, bytes: &[u8], dest: &Path) -> Result<usize> {
    runtime.create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut written = 0;

    for entry in archive.entries().context("Failed to read tar.gz archive")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let raw_path = entry.path().context("Invalid tar entry path")?.into_owned();
        let Some(relative) = contained_path(&raw_path) else {
            debug!("Skipping unsafe entry {:?}", raw_path);
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            runtime.create_dir_all(&target)?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                runtime.create_dir_all(parent)?;
            }
            let mut out = runtime.create_file(&target)?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("Failed to extract file {:?}", target))?;
            drop(out);

            #[cfg(unix)]
            if let Ok(mode) = entry.header().mode()
                && let Err(e) = runtime.set_permissions(&target, mode)
            {
                debug!("Failed to set permissions on {:?}: {}", target, e);
            }
            written += 1;
        } else {
            debug!("Skipping {:?} entry {:?}", entry_type, raw_path);
        }
    }
    Ok(written)
}

/// The entry path relative to the extraction root, if it stays inside it.
fn contained_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFormat;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::tempdir;

    fn archive_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (raw_name, content) in entries {
            let mut header = Header::new_gnu();
            // Bypass set_path, which refuses `..` and absolute paths.
            header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name.as_bytes());
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append(&header, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_pack_and_unpack_tree() {
        let src = tempdir().unwrap();
        fs::create_dir_all(src.path().join("lib/1.0.0/docs")).unwrap();
        fs::write(src.path().join("lib/1.0.0/lib.go"), "package lib").unwrap();
        fs::write(src.path().join("lib/1.0.0/dependencies.json"), "[]").unwrap();

        let bytes = ArchiveFormat::TarGz.pack(&RealRuntime, src.path()).unwrap();

        let dest = tempdir().unwrap();
        let written = unpack(&RealRuntime, &bytes, dest.path()).unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("lib/1.0.0/lib.go")).unwrap(),
            "package lib"
        );
        assert!(dest.path().join("lib/1.0.0/docs").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_survives() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempdir().unwrap();
        let tool = src.path().join("tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let bytes = ArchiveFormat::TarGz.pack(&RealRuntime, src.path()).unwrap();
        let dest = tempdir().unwrap();
        unpack(&RealRuntime, &bytes, dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_unpack_merges_into_existing_root() {
        let dest = tempdir().unwrap();
        fs::create_dir_all(dest.path().join("other/2.0.0")).unwrap();
        fs::write(dest.path().join("other/2.0.0/keep.txt"), "keep").unwrap();

        let bytes = archive_with(&[("./lib/1.0.0/a.txt", "a")]);
        unpack(&RealRuntime, &bytes, dest.path()).unwrap();

        assert!(dest.path().join("lib/1.0.0/a.txt").exists());
        assert!(dest.path().join("other/2.0.0/keep.txt").exists());
    }

    #[test]
    fn test_unpack_skips_escaping_entries() {
        let outer = tempdir().unwrap();
        let dest = outer.path().join("root");

        let bytes = archive_with(&[("../evil.txt", "x"), ("/abs.txt", "y"), ("ok.txt", "z")]);
        let written = unpack(&RealRuntime, &bytes, &dest).unwrap();

        assert_eq!(written, 1);
        assert!(dest.join("ok.txt").exists());
        assert!(!outer.path().join("evil.txt").exists());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dest = tempdir().unwrap();
        assert!(unpack(&RealRuntime, b"definitely not gzip", dest.path()).is_err());
    }

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(contained_path(Path::new("./")), Some(PathBuf::new()));
        assert_eq!(contained_path(Path::new("a/../../b")), None);
        assert_eq!(contained_path(Path::new("/etc/passwd")), None);
    }
}
