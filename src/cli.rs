//! Command-line interface for conduit.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

/// A one-shot action that runs instead of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    InstallUser,
    InstallService,
    Uninstall,
}

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Root directory for the file service.
    pub root: Option<PathBuf>,
    /// API key for origin-less remote clients.
    pub api_key: Option<String>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Enable debug logging.
    pub debug: bool,
    /// Print (generating if needed) the persisted API key and exit.
    pub key: bool,
    /// Installer action to run and exit.
    pub admin: Option<AdminAction>,
    /// Disable automatic shutdown on inactivity.
    pub no_idle_shutdown: bool,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('r') | Long("root") => {
                result.root = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("api-key") => {
                result.api_key = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("debug") => {
                result.debug = true;
            }
            Long("key") => {
                result.key = true;
            }
            Long("install-user") => {
                result.set_admin(AdminAction::InstallUser)?;
            }
            Long("install-service") => {
                result.set_admin(AdminAction::InstallService)?;
            }
            Long("uninstall") => {
                result.set_admin(AdminAction::Uninstall)?;
            }
            Long("no-idle-shutdown") => {
                result.no_idle_shutdown = true;
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

impl Args {
    fn set_admin(&mut self, action: AdminAction) -> Result<(), ArgsError> {
        match self.admin {
            Some(existing) if existing != action => Err(ArgsError::ConflictingActions),
            _ => {
                self.admin = Some(action);
                Ok(())
            }
        }
    }
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"conduit {version}
Local access daemon: a browser terminal and file editor for this machine

USAGE:
    conduit [OPTIONS]

OPTIONS:
    -H, --host <ADDR>       Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>       Port to listen on [default: 3022]
    -c, --config <FILE>     Path to configuration file (JSON)
    -r, --root <DIR>        Root directory for the file API [default: home]
    -k, --api-key <KEY>     API key for origin-less remote clients
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --debug             Enable debug logging
        --key               Print the stored API key (generating one) and exit
        --install-user      Install for the current user and exit
        --install-service   Install as a system service (requires root) and exit
        --uninstall         Remove user and service installations and exit
        --no-idle-shutdown  Never shut down on inactivity (recommended for services)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    CONDUIT_HOST              Host address (overrides config)
    CONDUIT_PORT              Port number (overrides config)
    CONDUIT_ROOT              File API root (overrides config)
    CONDUIT_API_KEY           API key (overrides config and key file)
    CONDUIT_ALLOWED_ORIGINS   Comma-separated origin allow-list
    CONDUIT_LOG_LEVEL         Log level (overrides config)
    RUST_LOG                  Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:3022, home directory)
    conduit

    # Generate a key for remote tools, then serve on all interfaces
    conduit --key
    conduit -H 0.0.0.0

    # Serve a project directory without idle shutdown
    conduit --root ~/projects --no-idle-shutdown
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("conduit {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    /// Lexopt parsing error.
    #[error("{0}")]
    Lexopt(#[from] lexopt::Error),
    /// Invalid argument value.
    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
    /// More than one installer action requested.
    #[error("only one of --install-user, --install-service, --uninstall may be given")]
    ConflictingActions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("conduit")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(result.admin.is_none());
        assert!(!result.no_idle_shutdown);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_long_options() {
        let result =
            parse_args_from(args(&["--host", "::1", "--port", "9000"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "::1");
        assert_eq!(result.port, Some(9000));
    }

    #[test]
    fn test_root_with_equals() {
        let result = parse_args_from(args(&["--root=/srv/files"])).unwrap();
        assert_eq!(result.root, Some(PathBuf::from("/srv/files")));
    }

    #[test]
    fn test_api_key() {
        let result = parse_args_from(args(&["-k", "my-secret"])).unwrap();
        assert_eq!(result.api_key, Some("my-secret".to_string()));
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/conduit.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/conduit.json")));
    }

    #[test]
    fn test_flags() {
        let result =
            parse_args_from(args(&["--debug", "--key", "--no-idle-shutdown"])).unwrap();
        assert!(result.debug);
        assert!(result.key);
        assert!(result.no_idle_shutdown);
    }

    #[test]
    fn test_admin_actions() {
        let result = parse_args_from(args(&["--install-user"])).unwrap();
        assert_eq!(result.admin, Some(AdminAction::InstallUser));

        let result = parse_args_from(args(&["--install-service"])).unwrap();
        assert_eq!(result.admin, Some(AdminAction::InstallService));

        let result = parse_args_from(args(&["--uninstall", "--uninstall"])).unwrap();
        assert_eq!(result.admin, Some(AdminAction::Uninstall));
    }

    #[test]
    fn test_conflicting_admin_actions() {
        let result = parse_args_from(args(&["--install-user", "--uninstall"]));
        assert!(matches!(result, Err(ArgsError::ConflictingActions)));
    }

    #[test]
    fn test_help_flag() {
        let result = parse_args_from(args(&["-h"])).unwrap();
        assert!(result.help);

        let result = parse_args_from(args(&["--help"])).unwrap();
        assert!(result.help);
    }

    #[test]
    fn test_version_flag() {
        let result = parse_args_from(args(&["-V"])).unwrap();
        assert!(result.version);

        let result = parse_args_from(args(&["--version"])).unwrap();
        assert!(result.version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_port() {
        let result = parse_args_from(args(&["-p", "invalid"]));
        assert!(matches!(result, Err(ArgsError::InvalidValue("port", _))));
    }

    #[test]
    fn test_invalid_host() {
        let result = parse_args_from(args(&["-H", "not-an-ip"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_positional_rejected() {
        let result = parse_args_from(args(&["kill"]));
        assert!(matches!(result, Err(ArgsError::UnexpectedArgument(_))));
    }

    #[test]
    fn test_unknown_flag() {
        assert!(parse_args_from(args(&["--no-auth"])).is_err());
    }
}
