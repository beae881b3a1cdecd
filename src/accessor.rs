use std::path::Path;

use crate::engine::{EngineHandle, OpenMode};
use crate::error::{Error, Result};

/// Reads and writes metadata packets through an initialized engine.
///
/// Borrowed from an [`EngineSession`](crate::EngineSession), so it cannot
/// outlive the session that proves the engine is up.
///
/// # Example
///
/// ```rust,no_run
/// use xmp_gate::EngineLifecycle;
///
/// let engine = EngineLifecycle::global();
/// engine.initialize();
///
/// let session = engine.session()?;
/// let accessor = session.accessor();
/// accessor.write("<xmp>title=Foo</xmp>", "a.mov")?;
/// assert!(accessor.parse("a.mov").unwrap().contains("title=Foo"));
/// # Ok::<(), xmp_gate::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MetadataAccessor<'s> {
    engine: &'s EngineHandle,
}

impl<'s> MetadataAccessor<'s> {
    pub(crate) fn new(engine: &'s EngineHandle) -> Self {
        Self { engine }
    }

    /// Return the packet text of `path`, or `None` if there is none.
    ///
    /// Missing, unreadable and unsupported files also yield `None`; use
    /// [`read`](Self::read) to see why.
    pub fn parse(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = path.as_ref();
        match self.read(path) {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                log::debug!("No metadata in {}", path.display());
                None
            }
            Err(e) if e.is_soft() => {
                log::debug!("Could not read metadata from {}: {e}", path.display());
                None
            }
            Err(e) => {
                log::warn!("Cannot read metadata from {}: {e}", path.display());
                None
            }
        }
    }

    /// Like [`parse`](Self::parse), but reports failures.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Option<String>> {
        let file = self.engine.files().open(path.as_ref(), OpenMode::Read)?;
        match file.packet() {
            Some(raw) => self.engine.meta().decode_packet(raw),
            None => Ok(None),
        }
    }

    /// Store `text` as the packet of `path`, replacing any existing one.
    ///
    /// The file must already exist and be writable. On error it is left
    /// exactly as it was.
    pub fn write(&self, text: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_packet(text, path)
            .inspect_err(|e| log::warn!("Failed to write metadata to {}: {e}", path.display()))
    }

    /// Check that `text` would be accepted by [`write`](Self::write),
    /// without touching any file.
    pub fn validate(&self, text: &str) -> Result<()> {
        self.engine.meta().encode_packet(text, 0).map(drop)
    }

    fn write_packet(&self, text: &str, path: &Path) -> Result<()> {
        let meta = self.engine.meta();
        let mut file = self.engine.files().open(path, OpenMode::Update)?;
        let padding = file.padding();

        match file.put_packet(meta.encode_packet(text, padding)?) {
            Err(Error::PacketTooLarge { format, size, .. }) if padding > 0 => {
                log::debug!("{format} packet of {size} bytes too large with padding, retrying without");
                file.put_packet(meta.encode_packet(text, 0)?)?;
            }
            result => result?,
        }

        file.commit()?;
        log::debug!("Wrote metadata to {}", file.path().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileOptions;
    use crate::engine::{FileSubsystem, XmpFiles, XmpMeta};
    use crate::engine::formats::tests::{sample_jpeg, sample_mov, sample_png, sample_wav, sample_webp};
    use crate::lifecycle::EngineLifecycle;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const TITLE: &str = "<xmp>title=Foo</xmp>";

    fn engine() -> EngineLifecycle {
        let engine = EngineLifecycle::new();
        assert!(engine.initialize());
        engine
    }

    fn fixture(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    // ── round trips ──────────────────────────────────────────────────

    #[test]
    fn round_trip_every_container() {
        let dir = tempdir().unwrap();
        let engine = engine();
        let session = engine.session().unwrap();
        let accessor = session.accessor();

        for (name, bytes) in [
            ("a.jpg", sample_jpeg()),
            ("a.png", sample_png()),
            ("a.mov", sample_mov()),
            ("a.wav", sample_wav()),
            ("a.webp", sample_webp()),
        ] {
            let path = fixture(&dir, name, &bytes);
            assert_eq!(accessor.parse(&path), None, "{name} starts without metadata");
            accessor.write(TITLE, &path).unwrap();
            assert_eq!(accessor.parse(&path).as_deref(), Some(TITLE), "{name}");
        }
    }

    #[test]
    fn write_twice_equals_once() {
        let dir = tempdir().unwrap();
        let engine = engine();
        let session = engine.session().unwrap();
        let accessor = session.accessor();

        for (name, bytes) in [("b.jpg", sample_jpeg()), ("b.mov", sample_mov()), ("b.wav", sample_wav())] {
            let path = fixture(&dir, name, &bytes);
            accessor.write(TITLE, &path).unwrap();
            let once = fs::read(&path).unwrap();
            accessor.write(TITLE, &path).unwrap();
            assert_eq!(fs::read(&path).unwrap(), once, "{name}");
        }
    }

    #[test]
    fn rewrite_replaces_text() {
        let dir = tempdir().unwrap();
        let path = fixture(&dir, "c.mov", &sample_mov());
        let engine = engine();
        let session = engine.session().unwrap();
        let accessor = session.accessor();

        accessor.write(TITLE, &path).unwrap();
        accessor.write("<xmp>title=Bar</xmp>", &path).unwrap();
        assert_eq!(accessor.parse(&path).as_deref(), Some("<xmp>title=Bar</xmp>"));
    }

    #[test]
    fn oversized_jpeg_packet_drops_padding() {
        let dir = tempdir().unwrap();
        let path = fixture(&dir, "big.jpg", &sample_jpeg());
        let engine = engine();
        let session = engine.session().unwrap();

        let text = format!("<a>{}</a>", "x".repeat(64_000));
        session.accessor().write(&text, &path).unwrap();
        assert_eq!(session.accessor().parse(&path), Some(text));
    }

    // ── failures ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_reads_none_and_write_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.mov");
        let engine = engine();
        let session = engine.session().unwrap();
        let accessor = session.accessor();

        assert_eq!(accessor.parse(&path), None);
        assert!(matches!(accessor.read(&path), Err(Error::NotFound(_))));
        assert!(matches!(accessor.write(TITLE, &path), Err(Error::NotFound(_))));
        assert!(!path.exists());
        assert!(engine.is_initialized());
    }

    #[test]
    fn invalid_text_leaves_file_unchanged() {
        let dir = tempdir().unwrap();
        let original = sample_mov();
        let path = fixture(&dir, "d.mov", &original);
        let engine = engine();
        let session = engine.session().unwrap();

        let err = session.accessor().write("<a><b></a>", &path).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[test]
    fn malformed_container_reads_none() {
        let dir = tempdir().unwrap();
        let path = fixture(&dir, "e.jpg", b"\xFF\xD8\xFFgarbage");
        let engine = engine();
        let session = engine.session().unwrap();
        let accessor = session.accessor();

        assert_eq!(accessor.parse(&path), None);
        assert!(accessor.read(&path).is_err());
        assert!(accessor.write(TITLE, &path).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"\xFF\xD8\xFFgarbage");
    }

    #[test]
    fn validate_checks_text_only() {
        let engine = engine();
        let session = engine.session().unwrap();
        assert!(session.accessor().validate(TITLE).is_ok());
        assert!(matches!(session.accessor().validate("<a><b></a>"), Err(Error::InvalidPacket(_))));
    }

    #[test]
    fn released_files_read_none() {
        let dir = tempdir().unwrap();
        let path = fixture(&dir, "f.mov", &sample_mov());
        let meta = XmpMeta::acquire().unwrap();
        let mut files = XmpFiles::acquire(&meta, FileOptions::default()).unwrap();
        files.release().unwrap();
        let handle = EngineHandle::new(Box::new(meta), Box::new(files));
        let accessor = MetadataAccessor::new(&handle);

        assert!(matches!(accessor.read(&path), Err(Error::NotInitialized)));
        assert_eq!(accessor.parse(&path), None);
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempdir().unwrap();
        let path = fixture(&dir, "photo.heic", b"\0\0\0\x14ftypheic\0\0\0\0mif1");
        let engine = EngineLifecycle::with_options(FileOptions {
            sidecar_fallback: true,
            ..FileOptions::default()
        });
        assert!(engine.initialize());
        let session = engine.session().unwrap();

        session.accessor().write(TITLE, &path).unwrap();
        assert!(dir.path().join("photo.xmp").exists());
        assert_eq!(session.accessor().parse(&path).as_deref(), Some(TITLE));
    }
}
