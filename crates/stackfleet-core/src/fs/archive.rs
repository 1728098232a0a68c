//! Zip packaging of function code
//!
//! A code location is packaged into a single zip archive:
//! - a file that already is a zip archive is used as is
//! - any other file becomes a one-entry archive
//! - a directory is archived recursively, entries relative to the directory
//!
//! Entries are written in lexicographic order so the same tree always
//! produces the same entry list.

use anyhow::Context;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Package a file or directory into zip bytes.
pub fn package_code(path: &Path) -> anyhow::Result<Vec<u8>> {
    let meta = fs::metadata(path)
        .with_context(|| format!("Failed to stat code path: {}", path.display()))?;

    if meta.is_file() {
        let content =
            fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        if is_zip_archive(&content) {
            return Ok(content);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Code path has no file name: {}", path.display()))?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(name.as_str(), options())
            .with_context(|| format!("Failed to add {} to archive", name))?;
        zip.write_all(&content)
            .with_context(|| format!("Failed to write {} to archive", name))?;
        return finish(zip);
    }

    if meta.is_dir() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        add_dir_recursive(&mut zip, path, "")?;
        return finish(zip);
    }

    anyhow::bail!("Unsupported code path: {}", path.display())
}

/// Whether `bytes` parse as a zip archive.
pub fn is_zip_archive(bytes: &[u8]) -> bool {
    ZipArchive::new(Cursor::new(bytes)).is_ok()
}

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn finish(zip: ZipWriter<Cursor<Vec<u8>>>) -> anyhow::Result<Vec<u8>> {
    let cursor = zip.finish().context("Failed to finalize zip archive")?;
    Ok(cursor.into_inner())
}

fn add_dir_recursive(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    base: &str,
) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut sorted_entries: Vec<_> = entries
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
    sorted_entries.sort_by_key(|e| e.file_name());

    for entry in sorted_entries {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let rel_path = if base.is_empty() {
            name_str.to_string()
        } else {
            format!("{}/{}", base, name_str)
        };

        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat file: {}", entry.path().display()))?;

        if ty.is_dir() {
            zip.add_directory(format!("{}/", rel_path), options())
                .with_context(|| format!("Failed to add directory {} to archive", rel_path))?;
            add_dir_recursive(zip, &entry.path(), &rel_path)?;
        } else if ty.is_file() {
            let content = fs::read(entry.path())
                .with_context(|| format!("Failed to read file: {}", entry.path().display()))?;
            zip.start_file(rel_path.as_str(), options())
                .with_context(|| format!("Failed to add {} to archive", rel_path))?;
            zip.write_all(&content)
                .with_context(|| format!("Failed to write {} to archive", rel_path))?;
        } else if ty.is_symlink() {
            anyhow::bail!("Symlinks are not supported: {}", entry.path().display());
        } else {
            anyhow::bail!(
                "Unsupported filesystem entry type: {}",
                entry.path().display()
            );
        }
    }

    Ok(())
}
