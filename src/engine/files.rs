use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::formats::{self, Source, Splice};
use super::kind::MediaKind;
use super::{FileSubsystem, MetaSubsystem};
use crate::config::FileOptions;
use crate::error::{Error, Result};

/// How a [`MediaFile`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Packet lookup only; [`MediaFile::put_packet`] is refused.
    Read,
    /// The target must exist and be writable; changes land on [`MediaFile::commit`].
    Update,
}

/// The file subsystem.
///
/// Can only be acquired on a ready metadata subsystem, and carries the
/// [`FileOptions`] it was started with for every file it opens.
#[derive(Debug)]
pub struct XmpFiles {
    options: FileOptions,
    ready: bool,
}

impl XmpFiles {
    pub fn acquire(meta: &dyn MetaSubsystem, options: FileOptions) -> Result<Self> {
        if !meta.is_ready() {
            return Err(Error::MetaNotReady("XmpFiles"));
        }
        log::debug!("XmpFiles initialized with {options:?}");
        Ok(Self { options, ready: true })
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }
}

impl FileSubsystem for XmpFiles {
    fn name(&self) -> &str {
        "XmpFiles"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<MediaFile> {
        if !self.ready {
            return Err(Error::NotInitialized);
        }
        MediaFile::open(path, mode, &self.options)
    }

    fn release(&mut self) -> Result<()> {
        self.ready = false;
        log::debug!("XmpFiles terminated");
        Ok(())
    }
}

/// A media file together with its current packet.
///
/// Only the packet is kept between calls. An update records how the file
/// changes and [`commit`](Self::commit) streams the unchanged ranges and the
/// new bytes into a temporary file next to the target, then renames it into
/// place, so the target is either fully updated or untouched. Dropping an
/// uncommitted file discards the changes.
///
/// Symbolic links are resolved on open: the file they point to is the one
/// read and replaced. A file with more than one hard link is refused for
/// update, since replacing it would detach it from its other names.
#[derive(Debug)]
pub struct MediaFile {
    /// The file the packet is stored in: the media file, or its sidecar.
    target: PathBuf,
    mode: OpenMode,
    kind: MediaKind,
    // length of the target when opened; a commit requires it unchanged
    source_len: u64,
    packet: Option<Vec<u8>>,
    padding: usize,
    pending: Option<Splice>,
}

// Enough leading bytes for MediaKind::sniff.
const SNIFF_LEN: usize = 16;

impl MediaFile {
    pub(crate) fn open(path: &Path, mode: OpenMode, options: &FileOptions) -> Result<Self> {
        let target = fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        let mut source = Source::open(&target)?;
        let kind = MediaKind::detect(&target, &source.head(SNIFF_LEN)?);
        log::debug!("Opening {} as {} ({mode:?})", target.display(), kind.name());

        let mut file = Self {
            target,
            mode,
            kind,
            source_len: source.len(),
            packet: None,
            padding: options.packet_padding,
            pending: None,
        };

        if kind.is_embedded() {
            if mode == OpenMode::Update {
                ensure_writable(&file.target)?;
            }
            file.packet = formats::read_packet(kind, &mut source)?;
        } else if kind == MediaKind::Sidecar && options.sidecar_fallback {
            drop(source);
            let sidecar = file.target.with_extension("xmp");
            file.open_sidecar(sidecar)?;
        } else if mode == OpenMode::Read && options.scan_unknown_formats {
            file.packet = formats::read_packet(MediaKind::Unknown, &mut source)?;
        } else {
            return Err(Error::unsupported(format!(
                "{} cannot carry an XMP packet ({} file)",
                path.display(),
                kind.name()
            )));
        }

        Ok(file)
    }

    fn open_sidecar(&mut self, sidecar: PathBuf) -> Result<()> {
        match fs::canonicalize(&sidecar) {
            Ok(resolved) => {
                if self.mode == OpenMode::Update {
                    ensure_writable(&resolved)?;
                }
                let bytes = fs::read(&resolved).map_err(|e| Error::io(&resolved, e))?;
                self.source_len = bytes.len() as u64;
                self.packet = Some(bytes).filter(|b| !b.is_empty());
                self.target = resolved;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No sidecar at {}", sidecar.display());
                self.source_len = 0;
                self.target = sidecar;
            }
            Err(e) => return Err(Error::io(&sidecar, e)),
        }
        Ok(())
    }

    /// The file a commit writes to, with symbolic links resolved.
    pub fn path(&self) -> &Path {
        &self.target
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Raw packet bytes as stored in the file.
    pub fn packet(&self) -> Option<&[u8]> {
        self.packet.as_deref()
    }

    /// Trailer padding to reserve when encoding a packet for this file.
    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Replace (or insert) the packet. Nothing is written before
    /// [`commit`](Self::commit); a second call replaces the first.
    pub fn put_packet(&mut self, packet: Vec<u8>) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(Error::ReadOnly(self.target.clone()));
        }

        let splice = if self.kind == MediaKind::Sidecar {
            Splice::replace(packet.clone())
        } else {
            let mut source = Source::open(&self.target)?;
            formats::write_packet(self.kind, &mut source, &packet)?
        };
        self.pending = Some(splice);
        self.packet = Some(packet);
        Ok(())
    }

    /// Write pending changes to disk atomically. No-op when nothing changed.
    pub fn commit(&mut self) -> Result<()> {
        let Some(splice) = self.pending.as_ref() else {
            return Ok(());
        };

        let staged = if splice.copies_source() {
            let mut source = Source::open(&self.target)?;
            if source.len() != self.source_len {
                return Err(Error::io(
                    &self.target,
                    std::io::Error::other("file changed size since it was opened"),
                ));
            }
            stage(&self.target, |out| splice.write_to(&mut source, out))?
        } else {
            stage(&self.target, |out| splice.write_to(&mut Source::empty(&self.target), out))?
        };
        let written = splice.len();
        persist(staged, &self.target)?;

        self.pending = None;
        self.source_len = written;
        log::debug!("Committed {written} bytes to {}", self.target.display());
        Ok(())
    }
}

fn ensure_writable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    // Honour the read-only attribute even when running privileged.
    if metadata.permissions().readonly() {
        return Err(Error::ReadOnly(path.to_path_buf()));
    }
    let links = hard_links(&metadata);
    if links > 1 {
        return Err(Error::HardLinked {
            path: path.to_path_buf(),
            links,
        });
    }
    fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn hard_links(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn hard_links(_metadata: &fs::Metadata) -> u64 {
    1
}

/// Fill a temp file in the target's directory and fsync it.
fn stage(target: &Path, fill: impl FnOnce(&mut BufWriter<&File>) -> Result<()>) -> Result<NamedTempFile> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(target, e))?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        fill(&mut out)?;
        out.flush().map_err(|e| Error::io(tmp.path(), e))?;
    }
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;

    if let Ok(metadata) = fs::metadata(target) {
        fs::set_permissions(tmp.path(), metadata.permissions()).map_err(|e| Error::io(tmp.path(), e))?;
    }
    Ok(tmp)
}

/// Rename the staged file over the target.
fn persist(tmp: NamedTempFile, target: &Path) -> Result<()> {
    tmp.persist(target).map_err(|e| Error::io(target, e.error))?;
    Ok(())
}
