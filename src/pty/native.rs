//! Native PTY implementation using portable-pty.

use std::path::Path;

use portable_pty::{native_pty_system, CommandBuilder};

use super::{ProcessHandle, PtyResizer, PtySession, PtySize, ShellProcess};
use crate::error::ConduitError;
use crate::Result;

/// `PROMPT_COMMAND` that reports the shell's working directory to the client
/// as an `OSC 9;9` sequence after every command.
pub const CWD_REPORT_HOOK: &str = r#"printf "\033]9;9;%s\033\\" "${PWD}""#;

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
}

fn supports_cwd_hook(shell: &str) -> bool {
    let name = Path::new(shell)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(shell);
    matches!(name, "bash" | "zsh")
}

/// Build the command line for an interactive shell rooted at `cwd`.
pub fn shell_command(shell: &str, cwd: &Path) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(shell);
    cmd.cwd(cwd);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");

    if supports_cwd_hook(shell) {
        cmd.env("PROMPT_COMMAND", CWD_REPORT_HOOK);
    }
    cmd
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Start `shell` attached to a new pseudo-terminal in `cwd`.
    ///
    /// A failure here only concerns the caller's session.
    pub fn start(&self, shell: &str, cwd: &Path, size: PtySize) -> Result<PtySession> {
        let pair = self
            .pty_system
            .openpty(size.into())
            .map_err(|e| ConduitError::Pty(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(shell_command(shell, cwd))
            .map_err(|e| ConduitError::Pty(format!("failed to spawn {}: {}", shell, e)))?;

        // The slave side is owned by the child from here on; keeping our copy
        // open would stop reads from reporting EOF after the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ConduitError::Pty(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ConduitError::Pty(e.to_string()))?;

        #[cfg(unix)]
        let (resizer, process) = (
            PtyResizer::new(pair.master, None),
            ProcessHandle::Available(ShellProcess::new(child)),
        );

        // ConPTY owns the shell; it lives exactly as long as the pseudo console.
        #[cfg(windows)]
        let (resizer, process) = (
            PtyResizer::new(pair.master, Some(Box::new(child))),
            ProcessHandle::Unavailable,
        );

        Ok(PtySession {
            reader,
            writer,
            resizer,
            process,
        })
    }

    /// Start the platform default shell.
    pub fn start_default(&self, cwd: &Path) -> Result<PtySession> {
        self.start(&default_shell(), cwd, PtySize::default())
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}
