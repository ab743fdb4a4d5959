use anyhow::{Context, Result};
use std::io::Cursor;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use super::ArchiveEntry;
use crate::runtime::Runtime;

pub(super) fn pack<R: Runtime>(runtime: &R, entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in entries {
        let options: FileOptions<()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.mode);
        if entry.is_dir {
            zip.add_directory(entry.name.as_str(), options)
                .with_context(|| format!("Failed to add directory {}", entry.name))?;
        } else {
            zip.start_file(entry.name.as_str(), options)
                .with_context(|| format!("Failed to add file {}", entry.name))?;
            let mut reader = runtime.open(&entry.path)?;
            std::io::copy(&mut reader, &mut zip)
                .with_context(|| format!("Failed to compress {:?}", entry.path))?;
        }
    }

    let cursor = zip.finish().context("Failed to finish zip archive")?;
    Ok(cursor.into_inner())
}
