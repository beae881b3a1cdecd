//! The engine lifecycle gate.
//!
//! [`EngineLifecycle`] owns the engine subsystems and moves through
//! `Uninitialized -> Initialized -> Terminated` exactly once. Metadata access
//! goes through an [`EngineSession`], a shared guard that keeps the engine
//! alive for as long as it is held.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::accessor::MetadataAccessor;
use crate::config::FileOptions;
use crate::engine::{EngineHandle, SubsystemFactory, XmpEngine};
use crate::error::{Error, LifecycleError, Result};

static GLOBAL: OnceLock<EngineLifecycle> = OnceLock::new();

/// Observable state of an [`EngineLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    /// Terminal. The engine cannot be brought up again.
    Terminated,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initialized,
            2 => Self::Terminated,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initialized => 1,
            Self::Terminated => 2,
        }
    }
}

// The handle only exists in the Initialized variant.
enum EngineSlot {
    Uninitialized,
    Initialized(EngineHandle),
    Terminated,
}

/// Two-phase startup and shutdown of the metadata engine.
///
/// - [`initialize`](Self::initialize) acquires the metadata subsystem, then
///   the file subsystem; if the second fails the first is released again.
///   Calling it on an initialized engine does nothing.
/// - [`terminate`](Self::terminate) stops new sessions, waits for the ones in
///   flight, then releases files and metadata in that order.
/// - [`session`](Self::session) hands out the only way to reach the engine.
///
/// # Example
///
/// ```rust
/// use xmp_gate::EngineLifecycle;
///
/// let engine = EngineLifecycle::new();
/// assert!(!engine.is_initialized());
///
/// assert!(engine.initialize());
/// assert!(engine.initialize()); // no-op
///
/// {
///     let session = engine.session().unwrap();
///     assert_eq!(session.accessor().parse("missing.mov"), None);
/// }
///
/// engine.terminate();
/// assert!(!engine.is_initialized());
/// assert!(!engine.initialize()); // terminated for good
/// ```
pub struct EngineLifecycle {
    slot: RwLock<EngineSlot>,
    state: AtomicU8,
    closing: AtomicBool,
    factory: Box<dyn SubsystemFactory>,
    options: FileOptions,
}

impl EngineLifecycle {
    /// A lifecycle for the built-in engine with default file options.
    pub fn new() -> Self {
        Self::with_options(FileOptions::default())
    }

    pub fn with_options(options: FileOptions) -> Self {
        Self::with_factory(Box::new(XmpEngine), options)
    }

    /// A lifecycle whose subsystems come from `factory`.
    pub fn with_factory(factory: Box<dyn SubsystemFactory>, options: FileOptions) -> Self {
        Self {
            slot: RwLock::new(EngineSlot::Uninitialized),
            state: AtomicU8::new(EngineState::Uninitialized.as_u8()),
            closing: AtomicBool::new(false),
            factory,
            options,
        }
    }

    /// The process-wide lifecycle, created with default options on first use.
    pub fn global() -> &'static EngineLifecycle {
        GLOBAL.get_or_init(EngineLifecycle::new)
    }

    /// Current state. Never blocks.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == EngineState::Initialized
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    /// Bring the engine up. Returns `true` if it is initialized afterwards.
    ///
    /// Failures are logged; see [`try_initialize`](Self::try_initialize) for
    /// the reason.
    pub fn initialize(&self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Metadata engine initialization failed: {e}");
                false
            }
        }
    }

    pub fn try_initialize(&self) -> std::result::Result<(), LifecycleError> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut slot = self.write_slot();
        match *slot {
            EngineSlot::Initialized(_) => return Ok(()),
            EngineSlot::Terminated => return Err(LifecycleError::Terminated),
            EngineSlot::Uninitialized => {}
        }

        let mut meta = self
            .factory
            .acquire_meta()
            .map_err(|e| LifecycleError::MetaSubsystem(e.to_string()))?;

        let files = match self.factory.acquire_files(meta.as_ref(), &self.options) {
            Ok(files) => files,
            Err(e) => {
                if let Err(release_err) = meta.release() {
                    log::warn!("Failed to release {} after file subsystem failure: {release_err}", meta.name());
                }
                return Err(LifecycleError::FileSubsystem(e.to_string()));
            }
        };

        let handle = EngineHandle::new(meta, files);
        log::info!("Metadata engine initialized: {handle:?}");
        *slot = EngineSlot::Initialized(handle);
        self.state.store(EngineState::Initialized.as_u8(), Ordering::Release);
        Ok(())
    }

    /// Shut the engine down. No-op unless initialized.
    ///
    /// Blocks until every outstanding [`EngineSession`] has been dropped, so
    /// it must not be called from a thread that holds one.
    pub fn terminate(&self) {
        if !self.is_initialized() {
            return;
        }
        self.closing.store(true, Ordering::Release);

        let mut slot = self.write_slot();
        if !matches!(*slot, EngineSlot::Initialized(_)) {
            return;
        }
        if let EngineSlot::Initialized(handle) = std::mem::replace(&mut *slot, EngineSlot::Terminated) {
            handle.release();
        }
        self.state.store(EngineState::Terminated.as_u8(), Ordering::Release);
        log::info!("Metadata engine terminated");
    }

    /// Open a session on the initialized engine.
    ///
    /// A thread must not open a second session while it still holds one: a
    /// concurrent [`terminate`](Self::terminate) would wait on the first while
    /// the second waits on it.
    pub fn session(&self) -> Result<EngineSession<'_>> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::Terminated);
        }
        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            EngineSlot::Initialized(_) => {}
            EngineSlot::Uninitialized => return Err(Error::NotInitialized),
            EngineSlot::Terminated => return Err(Error::Terminated),
        }
        Ok(EngineSession { guard })
    }

    /// Read the packet of `path` through a short-lived session.
    pub fn parse(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = path.as_ref();
        match self.session() {
            Ok(session) => session.accessor().parse(path),
            Err(e) => {
                log::warn!("Cannot read metadata from {}: {e}", path.display());
                None
            }
        }
    }

    /// Write `text` as the packet of `path` through a short-lived session.
    pub fn write(&self, text: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let session = self
            .session()
            .inspect_err(|e| log::warn!("Cannot write metadata to {}: {e}", path.display()))?;
        session.accessor().write(text, path)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, EngineSlot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EngineLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("state", &self.state())
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field("options", &self.options)
            .finish()
    }
}

/// Proof that the engine is initialized, valid while held.
///
/// [`EngineLifecycle::terminate`] waits until every session is dropped.
pub struct EngineSession<'a> {
    guard: RwLockReadGuard<'a, EngineSlot>,
}

impl EngineSession<'_> {
    pub fn handle(&self) -> &EngineHandle {
        match &*self.guard {
            EngineSlot::Initialized(handle) => handle,
            // Sessions are only created over an initialized slot, and the
            // slot cannot change while the read guard is held.
            EngineSlot::Uninitialized | EngineSlot::Terminated => {
                unreachable!("engine session without an initialized engine")
            }
        }
    }

    pub fn accessor(&self) -> MetadataAccessor<'_> {
        MetadataAccessor::new(self.handle())
    }
}

impl std::fmt::Debug for EngineSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession").field("engine", self.handle()).finish()
    }
}
