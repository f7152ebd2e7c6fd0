//! PTY (Pseudo-Terminal) abstraction layer.
//!
//! This module provides a platform-independent interface for working with
//! pseudo-terminals. It supports both Unix PTY and Windows ConPTY.
//!
//! The two platforms differ in one important way: on Unix the spawned shell
//! is exposed as a killable, waitable [`ShellProcess`], while on Windows the
//! console host owns the process and the adapter reports
//! [`ProcessHandle::Unavailable`]. Callers must branch on the handle and must
//! treat a closed output stream as the authoritative end-of-session signal on
//! every platform.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter, Utf8Carry};
pub use native::{default_shell, shell_command, NativePty, CWD_REPORT_HOOK};

use std::any::Any;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{Child, ChildKiller, ExitStatus, MasterPty};
use tracing::debug;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// A geometry with a zero dimension cannot be applied to a terminal.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// The OS process behind a terminal session, where the platform exposes it.
pub enum ProcessHandle {
    /// The shell can be waited on and killed directly.
    Available(ShellProcess),
    /// The console host owns the process; closing the pty ends it.
    Unavailable,
}

impl ProcessHandle {
    /// Process ID, if a handle is available and the OS reported one.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Available(process) => process.pid(),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(process) => f
                .debug_tuple("Available")
                .field(&process.pid())
                .finish(),
            Self::Unavailable => f.write_str("Unavailable"),
        }
    }
}

/// A spawned shell process.
pub struct ShellProcess {
    child: Box<dyn Child + Send + Sync>,
}

impl ShellProcess {
    pub(crate) fn new(child: Box<dyn Child + Send + Sync>) -> Self {
        Self { child }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Obtain an independent handle that can kill the process while another
    /// thread is blocked in [`ShellProcess::wait`].
    pub fn killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.child.clone_killer()
    }

    /// Block until the process exits.
    pub fn wait(mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }
}

struct MasterSide {
    master: Box<dyn MasterPty + Send>,
    _keepalive: Option<Box<dyn Any + Send>>,
}

/// Resizes the pseudo-terminal of one session.
///
/// Cloneable; all clones refer to the same master side. Once
/// [`PtyResizer::close`] has run, resizing is a silent no-op.
#[derive(Clone)]
pub struct PtyResizer {
    inner: Arc<Mutex<Option<MasterSide>>>,
}

impl PtyResizer {
    pub(crate) fn new(
        master: Box<dyn MasterPty + Send>,
        keepalive: Option<Box<dyn Any + Send>>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(MasterSide {
                master,
                _keepalive: keepalive,
            }))),
        }
    }

    /// Apply a new row/column geometry. Errors (for example after the shell
    /// exited) are logged and otherwise ignored.
    pub fn resize(&self, size: PtySize) {
        let Ok(guard) = self.inner.lock() else {
            return;
        };
        if let Some(side) = guard.as_ref() {
            if let Err(e) = side.master.resize(size.into()) {
                debug!("PTY resize to {}x{} ignored: {}", size.cols, size.rows, e);
            }
        }
    }

    /// Release the master side of the pty.
    ///
    /// On Windows this closes the pseudo console, which terminates the
    /// attached shell.
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

/// Everything a session needs from a freshly started shell.
pub struct PtySession {
    /// Output produced by the shell.
    pub reader: Box<dyn Read + Send>,
    /// Input sent to the shell.
    pub writer: Box<dyn Write + Send>,
    /// Geometry control.
    pub resizer: PtyResizer,
    /// The shell process, when the platform exposes it.
    pub process: ProcessHandle,
}
