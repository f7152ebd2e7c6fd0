//! Installation and service registration.
//!
//! Each action is a zero-argument operation that returns a human-readable
//! report on success and failure alike. They run from the command line
//! (`--install-user`, `--install-service`, `--uninstall`) and from the
//! loopback-only administrative endpoints.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

const EXEC_NAME: &str = "conduit";
const USER_BIN_DIR: &str = ".local/bin";

#[cfg(target_os = "linux")]
const SYSTEM_EXEC_PATH: &str = "/usr/local/bin/conduit";
#[cfg(target_os = "linux")]
const SERVICE_NAME: &str = "conduit.service";
#[cfg(target_os = "linux")]
const SERVICE_FILE: &str = "/etc/systemd/system/conduit.service";

/// A failed administrative action. `message` is the report shown to the
/// caller, including any steps that completed before the failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AdminFailure {
    pub message: String,
}

impl AdminFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Installation actions.
pub trait Installer: Send + Sync {
    /// Install the running binary for the current user.
    fn install_user(&self) -> Result<String, AdminFailure>;

    /// Install the running binary as a system service.
    fn install_service(&self) -> Result<String, AdminFailure>;

    /// Remove every installation this installer knows about.
    fn uninstall(&self) -> Result<String, AdminFailure>;

    /// Whether the running executable is one of the install locations.
    fn is_installed(&self) -> bool;
}

/// Installer for the machine the daemon runs on.
#[derive(Debug, Clone)]
pub struct LocalInstaller {
    home: Option<PathBuf>,
    exe: Option<PathBuf>,
}

impl LocalInstaller {
    /// Use the current user's home and the running executable.
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
            exe: std::env::current_exe().ok(),
        }
    }

    /// Use explicit locations.
    pub fn with_paths(home: impl Into<PathBuf>, exe: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            exe: Some(exe.into()),
        }
    }

    /// `~/.local/bin/conduit`.
    pub fn user_exec_path(&self) -> Option<PathBuf> {
        self.home
            .as_ref()
            .map(|home| home.join(USER_BIN_DIR).join(EXEC_NAME))
    }

    fn install_locations(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.user_exec_path().into_iter().collect();
        #[cfg(target_os = "linux")]
        paths.push(PathBuf::from(SYSTEM_EXEC_PATH));
        paths
    }

    fn exe(&self) -> Result<&Path, AdminFailure> {
        self.exe
            .as_deref()
            .ok_or_else(|| AdminFailure::new("Could not determine the running executable."))
    }

    fn home(&self) -> Result<&Path, AdminFailure> {
        self.home
            .as_deref()
            .ok_or_else(|| AdminFailure::new("Could not determine the user home directory."))
    }
}

impl Default for LocalInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Installer for LocalInstaller {
    #[cfg(unix)]
    fn install_user(&self) -> Result<String, AdminFailure> {
        let exe = self.exe()?;
        let home = self.home()?;
        let bin_dir = home.join(USER_BIN_DIR);
        let target = bin_dir.join(EXEC_NAME);

        let mut report = String::from("Starting user installation...\n");
        std::fs::create_dir_all(&bin_dir).map_err(|e| {
            fail(&report, format!("Error creating {}: {}", bin_dir.display(), e))
        })?;
        let _ = writeln!(report, "- Ensured directory exists: {}", bin_dir.display());

        let copied = copy_executable(exe, &target)
            .map_err(|e| fail(&report, format!("Error copying executable: {}", e)))?;
        note_copy(&mut report, copied, &target);

        report.push_str("\nUser installation complete.\n");
        info!("Installed user binary at {}", target.display());
        Ok(report)
    }

    #[cfg(not(unix))]
    fn install_user(&self) -> Result<String, AdminFailure> {
        Err(AdminFailure::new(
            "User installation is not supported on this platform.",
        ))
    }

    #[cfg(target_os = "linux")]
    fn install_service(&self) -> Result<String, AdminFailure> {
        if !is_root() {
            return Err(AdminFailure::new(
                "Service installation requires root privileges. Please run with sudo.",
            ));
        }
        if !command_exists("systemctl") {
            return Err(AdminFailure::new(
                "Systemd (systemctl) not found. Cannot install service.",
            ));
        }

        let exe = self.exe()?;
        let home = self.home()?;
        let user = std::env::var("SUDO_USER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "root".to_string());

        let mut report = String::from("Starting system service installation...\n");
        let copied = copy_executable(exe, Path::new(SYSTEM_EXEC_PATH))
            .map_err(|e| fail(&report, format!("Error copying executable: {}", e)))?;
        note_copy(&mut report, copied, Path::new(SYSTEM_EXEC_PATH));

        let unit = service_unit(&user, Path::new(SYSTEM_EXEC_PATH), home);
        std::fs::write(SERVICE_FILE, unit)
            .map_err(|e| fail(&report, format!("Error writing {}: {}", SERVICE_FILE, e)))?;
        let _ = writeln!(report, "- Created systemd service file at {}", SERVICE_FILE);

        for args in [
            &["daemon-reload"][..],
            &["enable", SERVICE_NAME],
            &["start", SERVICE_NAME],
        ] {
            match run_command("systemctl", args) {
                Ok(()) => {
                    let _ = writeln!(report, "- systemctl {}", args.join(" "));
                }
                Err(e) => {
                    let _ = writeln!(report, "! Warning: {}", e);
                }
            }
        }

        report.push_str("\nService installation complete.\n");
        info!("Installed systemd service {}", SERVICE_NAME);
        Ok(report)
    }

    #[cfg(not(target_os = "linux"))]
    fn install_service(&self) -> Result<String, AdminFailure> {
        Err(AdminFailure::new(
            "Service installation is only supported on Linux.",
        ))
    }

    fn uninstall(&self) -> Result<String, AdminFailure> {
        let mut report = String::from("Starting uninstallation...\n");
        let mut removed = false;

        if let Some(user_exec) = self.user_exec_path() {
            removed |= remove_if_exists(&user_exec, &mut report)?;
        }
        removed |= uninstall_service(&mut report)?;

        if removed {
            report.push_str("\nUninstallation complete.\n");
        } else {
            report.push_str("- No installation found.\n");
        }
        Ok(report)
    }

    fn is_installed(&self) -> bool {
        let Some(exe) = self.exe.as_deref() else {
            return false;
        };
        self.install_locations().iter().any(|p| p == exe)
    }
}

fn fail(report: &str, message: impl AsRef<str>) -> AdminFailure {
    AdminFailure::new(format!("{}{}\n", report, message.as_ref()))
}

#[cfg(target_os = "linux")]
fn uninstall_service(report: &mut String) -> Result<bool, AdminFailure> {
    if !Path::new(SERVICE_FILE).exists() {
        return Ok(false);
    }
    if !is_root() {
        return Err(fail(
            report,
            "A system service is installed; removing it requires root privileges.",
        ));
    }
    for args in [&["stop", SERVICE_NAME][..], &["disable", SERVICE_NAME]] {
        if let Err(e) = run_command("systemctl", args) {
            let _ = writeln!(report, "! Warning: {}", e);
        }
    }
    remove_if_exists(Path::new(SERVICE_FILE), report)?;
    remove_if_exists(Path::new(SYSTEM_EXEC_PATH), report)?;
    if let Err(e) = run_command("systemctl", &["daemon-reload"]) {
        let _ = writeln!(report, "! Warning: {}", e);
    }
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn uninstall_service(_report: &mut String) -> Result<bool, AdminFailure> {
    Ok(false)
}

/// Copy the running binary into place. Returns false without touching
/// anything when `from` already is `to`, since copying a file onto itself
/// truncates it.
fn copy_executable(from: &Path, to: &Path) -> std::io::Result<bool> {
    if same_file(from, to) {
        return Ok(false);
    }
    std::fs::copy(from, to)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(to, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(true)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn note_copy(report: &mut String, copied: bool, target: &Path) {
    if copied {
        let _ = writeln!(report, "- Copied executable to {}", target.display());
    } else {
        let _ = writeln!(report, "- Executable already in place at {}", target.display());
    }
}

fn remove_if_exists(path: &Path, report: &mut String) -> Result<bool, AdminFailure> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            let _ = writeln!(report, "- Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(fail(
            report,
            format!("Error removing {}: {}", path.display(), e),
        )),
    }
}

/// systemd unit running the daemon as `user` with the file root at `home`.
pub fn service_unit(user: &str, exec: &Path, home: &Path) -> String {
    format!(
        "[Unit]
Description=Conduit terminal and file API server
After=network.target

[Service]
Type=simple
User={user}
ExecStart={exec} --root={home} --no-idle-shutdown
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        exec = exec.display(),
        home = home.display(),
    )
}

#[cfg(target_os = "linux")]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(target_os = "linux")]
fn command_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
fn run_command(program: &str, args: &[&str]) -> Result<(), String> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("'{} {}' failed: {}", program, args.join(" "), e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "'{} {}' failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
