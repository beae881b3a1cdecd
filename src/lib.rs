//! # xmp-gate
//!
//! Read and write XMP metadata packets in media files, behind an explicit
//! engine lifecycle.
//!
//! The engine has two halves, a metadata subsystem and a file subsystem, that
//! are brought up together by [`EngineLifecycle::initialize`] and torn down by
//! [`EngineLifecycle::terminate`]. Metadata can only be reached through an
//! [`EngineSession`], so reading from or writing to an engine that is not
//! running is a reported error rather than undefined behaviour.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn main() -> xmp_gate::Result<()> {
//!     let engine = xmp_gate::EngineLifecycle::global();
//!     if !engine.initialize() {
//!         return Err(xmp_gate::Error::NotInitialized);
//!     }
//!
//!     xmp_gate::write("<xmp>title=Foo</xmp>", "a.mov")?;
//!     let text = xmp_gate::parse("a.mov");
//!     assert!(text.unwrap().contains("title=Foo"));
//!
//!     engine.terminate();
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! For more than one call, hold a session and use its accessor. Termination
//! waits until every session has been dropped.
//!
//! ```rust,no_run
//! use xmp_gate::EngineLifecycle;
//!
//! let engine = EngineLifecycle::new();
//! engine.initialize();
//!
//! let session = engine.session()?;
//! let accessor = session.accessor();
//! for path in ["a.jpg", "b.png", "c.mp4"] {
//!     match accessor.read(path) {
//!         Ok(Some(xmp)) => println!("{path}: {xmp}"),
//!         Ok(None) => println!("{path}: no metadata"),
//!         Err(e) => println!("{path}: {e}"),
//!     }
//! }
//! # Ok::<(), xmp_gate::Error>(())
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Packet location |
//! |--------|-----------------|
//! | JPEG (`.jpg`, `.jpeg`) | APP1 XMP segment |
//! | PNG (`.png`) | `iTXt` chunk `XML:com.adobe.xmp` |
//! | MP4/QuickTime (`.mp4`, `.m4v`, `.m4a`, `.mov`, `.3gp`) | top-level XMP `uuid` box |
//! | WAV / AVI (`.wav`, `.avi`) | RIFF `_PMX` chunk |
//! | WebP (`.webp`, extended) | RIFF `XMP ` chunk |
//! | HEIC/AVIF/TIFF/RAW | `.xmp` sidecar, when enabled |
//! | anything else | read-only packet scan, when enabled |
//!
//! ## Modules
//!
//! - [`config`] — Configuration types and loading/saving
//! - [`engine`] — The metadata and file subsystems
//! - [`pipeline`] — Batch reads and writes over files and directories

mod accessor;
pub mod config;
pub mod engine;
mod error;
mod lifecycle;
pub mod pipeline;

use std::path::Path;

pub use accessor::MetadataAccessor;
pub use config::FileOptions;
pub use engine::MediaKind;
pub use error::{Error, LifecycleError, Result};
pub use lifecycle::{EngineLifecycle, EngineSession, EngineState};

/// Read the packet of `path` using the global engine.
///
/// `None` if the engine is not initialized, or the file is missing,
/// unreadable or has no metadata.
pub fn parse(path: impl AsRef<Path>) -> Option<String> {
    EngineLifecycle::global().parse(path)
}

/// Write `text` as the packet of `path` using the global engine.
pub fn write(text: &str, path: impl AsRef<Path>) -> Result<()> {
    EngineLifecycle::global().write(text, path)
}
