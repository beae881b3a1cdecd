//! The metadata engine: a metadata subsystem and a file subsystem.
//!
//! The two halves are acquired through a [`SubsystemFactory`] in a fixed
//! order (metadata first, then files) and are only reachable through an
//! [`EngineHandle`] owned by the [`EngineLifecycle`](crate::EngineLifecycle).
//!
//! - [`XmpMeta`] validates packet text and converts it to and from the
//!   on-disk `<?xpacket ...?>` form.
//! - [`XmpFiles`] locates and replaces the packet inside JPEG, PNG,
//!   ISO BMFF/QuickTime, WAV, AVI and WebP containers, with an optional
//!   `.xmp` sidecar for HEIC/RAW files.

mod files;
pub(crate) mod formats;
mod kind;
mod meta;

pub use files::{MediaFile, OpenMode, XmpFiles};
pub use kind::MediaKind;
pub(crate) use kind::is_supported_media;
pub use meta::XmpMeta;

use std::path::Path;

use crate::config::FileOptions;
use crate::error::Result;

/// The metadata half of the engine.
///
/// Implementations must be usable from several threads at once; all
/// per-call state lives on the stack of the caller.
pub trait MetaSubsystem: Send + Sync {
    /// Display name used in diagnostics.
    fn name(&self) -> &str;
    /// `true` between a successful acquisition and [`release`](Self::release).
    fn is_ready(&self) -> bool;
    /// Decode raw packet bytes to caller text. `Ok(None)` for an empty packet.
    fn decode_packet(&self, raw: &[u8]) -> Result<Option<String>>;
    /// Validate caller text and serialize it as a packet with `padding` bytes of trailer space.
    fn encode_packet(&self, text: &str, padding: usize) -> Result<Vec<u8>>;
    /// Tear the subsystem down.
    fn release(&mut self) -> Result<()>;
}

/// The file-I/O half of the engine.
pub trait FileSubsystem: Send + Sync {
    /// Display name used in diagnostics.
    fn name(&self) -> &str;
    /// Open a media file for reading or for update.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<MediaFile>;
    /// Tear the subsystem down.
    fn release(&mut self) -> Result<()>;
}

/// Acquires the two engine subsystems.
///
/// The lifecycle calls [`acquire_meta`](Self::acquire_meta) first and hands
/// the result to [`acquire_files`](Self::acquire_files); a file subsystem must
/// refuse to start on a metadata subsystem that is not ready.
pub trait SubsystemFactory: Send + Sync {
    fn acquire_meta(&self) -> Result<Box<dyn MetaSubsystem>>;
    fn acquire_files(
        &self,
        meta: &dyn MetaSubsystem,
        options: &FileOptions,
    ) -> Result<Box<dyn FileSubsystem>>;
}

/// The built-in engine: [`XmpMeta`] + [`XmpFiles`].
#[derive(Debug, Default, Clone, Copy)]
pub struct XmpEngine;

impl SubsystemFactory for XmpEngine {
    fn acquire_meta(&self) -> Result<Box<dyn MetaSubsystem>> {
        Ok(Box::new(XmpMeta::acquire()?))
    }

    fn acquire_files(
        &self,
        meta: &dyn MetaSubsystem,
        options: &FileOptions,
    ) -> Result<Box<dyn FileSubsystem>> {
        Ok(Box::new(XmpFiles::acquire(meta, options.clone())?))
    }
}

/// Both subsystems, ready for use.
///
/// Only exists inside an initialized lifecycle; callers reach it through an
/// [`EngineSession`](crate::EngineSession).
pub struct EngineHandle {
    meta: Box<dyn MetaSubsystem>,
    files: Box<dyn FileSubsystem>,
}

impl EngineHandle {
    pub(crate) fn new(meta: Box<dyn MetaSubsystem>, files: Box<dyn FileSubsystem>) -> Self {
        Self { meta, files }
    }

    pub fn meta(&self) -> &dyn MetaSubsystem {
        self.meta.as_ref()
    }

    pub fn files(&self) -> &dyn FileSubsystem {
        self.files.as_ref()
    }

    /// Release files, then metadata. Failures are logged, not returned.
    pub(crate) fn release(mut self) {
        if let Err(e) = self.files.release() {
            log::warn!("Failed to release {}: {e}", self.files.name());
        }
        if let Err(e) = self.meta.release() {
            log::warn!("Failed to release {}: {e}", self.meta.name());
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("meta", &self.meta.name())
            .field("files", &self.files.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_acquires_in_order() {
        let factory = XmpEngine;
        let meta = factory.acquire_meta().unwrap();
        assert!(meta.is_ready());
        let files = factory.acquire_files(meta.as_ref(), &FileOptions::default());
        assert!(files.is_ok());
    }

    #[test]
    fn files_refuse_unready_meta() {
        let factory = XmpEngine;
        let mut meta = factory.acquire_meta().unwrap();
        meta.release().unwrap();
        let err = factory
            .acquire_files(meta.as_ref(), &FileOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::MetaNotReady("XmpFiles")));
    }

    #[test]
    fn handle_release_tears_down_both() {
        let factory = XmpEngine;
        let meta = factory.acquire_meta().unwrap();
        let files = factory
            .acquire_files(meta.as_ref(), &FileOptions::default())
            .unwrap();
        let handle = EngineHandle::new(meta, files);
        assert_eq!(format!("{handle:?}"), "EngineHandle { meta: \"XmpMeta\", files: \"XmpFiles\" }");
        handle.release();
    }
}
