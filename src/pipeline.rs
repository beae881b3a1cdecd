use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::OutputConfig;
use crate::engine::{MediaKind, is_supported_media};
use crate::MetadataAccessor;

/// The outcome of reading one file.
///
/// `metadata` is `None` both when the file carries no packet and when it
/// could not be read; `error` tells the two apart.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub path: PathBuf,
    pub metadata: Option<String>,
    pub error: Option<String>,
}

/// The outcome of writing one file.
#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub path: PathBuf,
    pub written: bool,
    pub dry_run: bool,
    /// Copy of the original taken before the write, if configured.
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Collect supported media files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only files with a recognised media
/// extension are included (see [`MediaKind`]).
///
/// # Example
///
/// ```rust,no_run
/// use xmp_gate::pipeline::collect_media;
/// use std::path::PathBuf;
///
/// let files = collect_media(&[
///     PathBuf::from("clip.mov"),   // single file
///     PathBuf::from("./footage/"), // entire directory
/// ]);
/// println!("Found {} files", files.len());
/// ```
pub fn collect_media(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_media(path) {
                files.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_media(p) {
                    files.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    files
}

/// Read the packet of every file.
pub fn read_all(accessor: &MetadataAccessor<'_>, paths: &[PathBuf]) -> Vec<ReadResult> {
    paths
        .iter()
        .map(|path| match accessor.read(path) {
            Ok(metadata) => ReadResult {
                path: path.clone(),
                metadata,
                error: None,
            },
            Err(e) => ReadResult {
                path: path.clone(),
                metadata: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

/// Write `text` as the packet of every file.
///
/// The text is validated once up front; if it is rejected every file gets
/// that error and nothing is touched, backups included. With `dry_run`
/// nothing is touched either. With `backup_originals` each embedded target
/// is copied to `<file>.<ext>.bak` first; sidecar targets are never backed up
/// because the media file itself is not modified.
pub fn write_all(
    accessor: &MetadataAccessor<'_>,
    text: &str,
    paths: &[PathBuf],
    output: &OutputConfig,
) -> Vec<WriteResult> {
    if let Err(e) = accessor.validate(text) {
        log::error!("Rejected metadata packet: {e}");
        return paths
            .iter()
            .map(|path| WriteResult {
                path: path.clone(),
                written: false,
                dry_run: output.dry_run,
                backup_path: None,
                error: Some(e.to_string()),
            })
            .collect();
    }

    paths
        .iter()
        .map(|path| write_one(accessor, text, path, output))
        .collect()
}

fn write_one(accessor: &MetadataAccessor<'_>, text: &str, path: &Path, output: &OutputConfig) -> WriteResult {
    let mut result = WriteResult {
        path: path.to_path_buf(),
        written: false,
        dry_run: output.dry_run,
        backup_path: None,
        error: None,
    };

    if output.dry_run {
        log::info!("[dry run] Would write metadata to {}", path.display());
        return result;
    }

    let is_sidecar = MediaKind::from_path(path) == Some(MediaKind::Sidecar);
    if output.backup_originals && !is_sidecar && path.is_file() {
        match backup_file(path) {
            Ok(backup) => result.backup_path = Some(backup),
            Err(e) => log::warn!("Failed to backup {}: {e:#}", path.display()),
        }
    }

    match accessor.write(text, path) {
        Ok(()) => result.written = true,
        Err(e) => result.error = Some(e.to_string()),
    }
    result
}

/// Create a backup of the original file.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}
