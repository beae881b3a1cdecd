//! Per-container packet location rules.
//!
//! Handlers read through a [`Source`], seeking to box and chunk headers and
//! loading only the packet payload. A write produces a [`Splice`]: the new
//! file as ranges of the original plus the bytes that change, which the file
//! subsystem streams into a temporary file on commit. JPEG and PNG are
//! small enough to be handled whole through `img-parts`.

mod bmff;
mod jpeg;
mod png;
mod riff;
mod scan;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::kind::MediaKind;
use crate::error::{Error, Result};
use riff::Form;

/// Random access to the bytes of a media file.
///
/// Every I/O failure is reported against the path the source was opened for.
#[derive(Debug)]
pub(crate) struct Source<R> {
    inner: R,
    path: PathBuf,
    len: u64,
}

impl Source<File> {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::new(file, path)
    }
}

impl Source<io::Empty> {
    /// A zero-length source, for rewrites that copy nothing.
    pub(crate) fn empty(path: &Path) -> Self {
        Self {
            inner: io::empty(),
            path: path.to_path_buf(),
            len: 0,
        }
    }
}

impl<R: Read + Seek> Source<R> {
    pub(crate) fn new(mut inner: R, path: &Path) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0)).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            len,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `buf` from `offset`. Reading past the end is an error.
    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.inner.read_exact(buf))
            .map_err(|e| Error::io(&self.path, e))
    }

    pub(crate) fn read_vec(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| {
            Error::io(&self.path, io::Error::new(io::ErrorKind::OutOfMemory, "range exceeds address space"))
        })?;
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Up to `max` bytes from the start of the file.
    pub(crate) fn head(&mut self, max: usize) -> Result<Vec<u8>> {
        let len = self.len.min(max as u64);
        self.read_vec(0, len)
    }

    /// The whole file, for formats that are handled in memory.
    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read_vec(0, self.len)
    }

    /// Rewind and hand out the reader, for scanning.
    fn reader(&mut self) -> Result<&mut R> {
        self.inner.seek(SeekFrom::Start(0)).map_err(|e| Error::io(&self.path, e))?;
        Ok(&mut self.inner)
    }

    fn copy_to<W: Write>(&mut self, offset: u64, len: u64, dst: &mut W) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(&self.path, e))?;
        let copied = io::copy(&mut (&mut self.inner).take(len), dst).map_err(|e| Error::io(&self.path, e))?;
        if copied != len {
            return Err(Error::io(
                &self.path,
                io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while being rewritten"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    /// `len` bytes of the original, starting at `offset`.
    Copy { offset: u64, len: u64 },
    Data(Vec<u8>),
}

/// A rewritten file, described against the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Splice {
    pieces: Vec<Piece>,
}

impl Splice {
    /// New contents that share nothing with the original.
    pub(crate) fn replace(bytes: Vec<u8>) -> Self {
        let mut splice = Self::default();
        splice.data(bytes);
        splice
    }

    /// The original of length `len` with each `(offset, bytes)` patch
    /// overwritten in place. Patches must be sorted and must not overlap.
    pub(crate) fn patched(len: u64, patches: Vec<(u64, Vec<u8>)>) -> Self {
        let mut splice = Self::default();
        let mut pos = 0;
        for (offset, bytes) in patches {
            splice.copy(pos, offset - pos);
            pos = offset + bytes.len() as u64;
            splice.data(bytes);
        }
        splice.copy(pos, len.saturating_sub(pos));
        splice
    }

    pub(crate) fn copy(&mut self, offset: u64, len: u64) -> &mut Self {
        if len == 0 {
            return self;
        }
        if let Some(Piece::Copy { offset: prev, len: prev_len }) = self.pieces.last_mut() {
            if *prev + *prev_len == offset {
                *prev_len += len;
                return self;
            }
        }
        self.pieces.push(Piece::Copy { offset, len });
        self
    }

    pub(crate) fn data(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return self;
        }
        match self.pieces.last_mut() {
            Some(Piece::Data(prev)) => prev.extend_from_slice(&bytes),
            _ => self.pieces.push(Piece::Data(bytes)),
        }
        self
    }

    /// Length of the rewritten file.
    pub(crate) fn len(&self) -> u64 {
        self.pieces
            .iter()
            .map(|p| match p {
                Piece::Copy { len, .. } => *len,
                Piece::Data(bytes) => bytes.len() as u64,
            })
            .sum()
    }

    /// `true` if writing needs the original file.
    pub(crate) fn copies_source(&self) -> bool {
        self.pieces.iter().any(|p| matches!(p, Piece::Copy { .. }))
    }

    /// Stream the rewritten file into `dst`. Errors are reported against the
    /// source path, which is the file being replaced.
    pub(crate) fn write_to<R: Read + Seek, W: Write>(&self, src: &mut Source<R>, dst: &mut W) -> Result<()> {
        for piece in &self.pieces {
            match piece {
                Piece::Copy { offset, len } => src.copy_to(*offset, *len, dst)?,
                Piece::Data(bytes) => dst.write_all(bytes).map_err(|e| Error::io(src.path(), e))?,
            }
        }
        Ok(())
    }
}

/// Locate the raw packet in `src`.
pub(crate) fn read_packet<R: Read + Seek>(kind: MediaKind, src: &mut Source<R>) -> Result<Option<Vec<u8>>> {
    match kind {
        MediaKind::Jpeg => jpeg::read(&src.read_all()?),
        MediaKind::Png => png::read(&src.read_all()?),
        MediaKind::Bmff => bmff::read(src),
        MediaKind::Wav => riff::read(src, Form::Wave),
        MediaKind::Avi => riff::read(src, Form::Avi),
        MediaKind::WebP => riff::read(src, Form::WebP),
        MediaKind::Unknown => {
            let path = src.path().to_path_buf();
            scan::read(src.reader()?).map_err(|e| Error::io(&path, e))
        }
        MediaKind::Sidecar => Err(Error::unsupported("sidecar files hold the packet directly")),
    }
}

/// Plan the rewrite of `src` with the packet replaced (or added).
pub(crate) fn write_packet<R: Read + Seek>(kind: MediaKind, src: &mut Source<R>, packet: &[u8]) -> Result<Splice> {
    match kind {
        MediaKind::Jpeg => Ok(Splice::replace(jpeg::write(&src.read_all()?, packet)?)),
        MediaKind::Png => Ok(Splice::replace(png::write(&src.read_all()?, packet)?)),
        MediaKind::Bmff => bmff::write(src, packet),
        MediaKind::Wav => riff::write(src, packet, Form::Wave),
        MediaKind::Avi => riff::write(src, packet, Form::Avi),
        MediaKind::WebP => riff::write(src, packet, Form::WebP),
        MediaKind::Sidecar | MediaKind::Unknown => Err(Error::unsupported(format!(
            "no embedding rule for {} files",
            kind.name()
        ))),
    }
}
