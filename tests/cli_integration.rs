//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use conduit::cli::{parse_args_from, AdminAction, Args};
use conduit::config::{Config, DEFAULT_ALLOWED_ORIGINS};

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("conduit")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.host.is_none());
    assert!(result.port.is_none());
    assert!(result.config.is_none());
    assert!(result.root.is_none());
    assert!(result.api_key.is_none());
    assert!(result.admin.is_none());
    assert!(!result.key);
    assert!(!result.debug);
    assert!(!result.no_idle_shutdown);
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-H",
        "0.0.0.0",
        "-p",
        "8080",
        "-r",
        "/srv/projects",
        "-k",
        "my-api-key",
        "-l",
        "debug",
        "--no-idle-shutdown",
    ]))
    .unwrap();

    assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
    assert_eq!(result.port, Some(8080));
    assert_eq!(result.root, Some(PathBuf::from("/srv/projects")));
    assert_eq!(result.api_key, Some("my-api-key".to_string()));
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert!(result.no_idle_shutdown);
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/conduit.json"])).unwrap();

    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/conduit.json"
    );
}

#[test]
fn test_cli_one_shot_actions() {
    assert!(parse_args_from(args(&["--key"])).unwrap().key);
    assert_eq!(
        parse_args_from(args(&["--install-user"])).unwrap().admin,
        Some(AdminAction::InstallUser)
    );
    assert_eq!(
        parse_args_from(args(&["--install-service"])).unwrap().admin,
        Some(AdminAction::InstallService)
    );
    assert_eq!(
        parse_args_from(args(&["--uninstall"])).unwrap().admin,
        Some(AdminAction::Uninstall)
    );
}

#[test]
fn test_cli_conflicting_actions() {
    let result = parse_args_from(args(&["--install-user", "--uninstall"]));
    assert!(result.is_err());

    let repeated = parse_args_from(args(&["--uninstall", "--uninstall"])).unwrap();
    assert_eq!(repeated.admin, Some(AdminAction::Uninstall));
}

#[test]
fn test_cli_invalid_port() {
    let result = parse_args_from(args(&["-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_invalid_host() {
    let result = parse_args_from(args(&["-H", "not-an-ip"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_rejects_positional() {
    let err = parse_args_from(args(&["serve"])).unwrap_err();
    assert!(err.to_string().contains("serve"));
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let file = config_file(
        r#"{
            "server": {
                "host": "192.168.1.100",
                "port": 9000
            },
            "security": {
                "allowed_origins": ["https://one.example"],
                "api_key": "from-file"
            },
            "files": {
                "root": "/srv/share"
            },
            "idle": {
                "enabled": false,
                "timeout_secs": 120
            },
            "logging": {
                "level": "debug"
            }
        }"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.server.host, "192.168.1.100");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.security.allowed_origins, vec!["https://one.example"]);
    assert_eq!(config.security.api_key, Some("from-file".to_string()));
    assert_eq!(config.file_root(), PathBuf::from("/srv/share"));
    assert!(config.idle_timeout().is_none());
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_config_invalid_json() {
    let file = config_file("{ not json");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_config_priority_cli_over_file() {
    let file = config_file(
        r#"{
            "server": {
                "host": "10.0.0.1",
                "port": 5000
            },
            "security": {
                "api_key": "from-file"
            }
        }"#,
    );

    let args = Args {
        host: Some("192.168.1.1".parse().unwrap()),
        port: Some(8080),
        api_key: Some("from-cli".to_string()),
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert_eq!(config.server.host, "192.168.1.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.security.api_key, Some("from-cli".to_string()));
}

#[test]
fn test_config_file_kept_when_cli_silent() {
    let file = config_file(r#"{"server": {"port": 5000}}"#);

    let args = Args {
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    assert_eq!(config.server.port, 5000);
}

#[test]
fn test_config_no_idle_shutdown() {
    let args = Args {
        no_idle_shutdown: true,
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    assert!(config.idle_timeout().is_none());
}

#[test]
fn test_config_to_server_config() {
    let args = Args {
        host: Some("0.0.0.0".parse().unwrap()),
        port: Some(8080),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let server_config = config.to_server_config().unwrap();

    assert_eq!(server_config.host, "0.0.0.0");
    assert_eq!(server_config.port, 8080);
    assert_eq!(server_config.bind_address(), "0.0.0.0:8080");
}

#[test]
fn test_config_rejects_bad_host() {
    let mut config = Config::default();
    config.server.host = "localhost:80".to_string();
    assert!(config.to_server_config().is_err());
}

// ============================================================================
// Configuration Defaults Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3022);
    assert_eq!(
        config.security.allowed_origins.len(),
        DEFAULT_ALLOWED_ORIGINS.len()
    );
    assert!(config.security.api_key.is_none());
    assert_eq!(config.idle_timeout(), Some(Duration::from_secs(3600)));
}

#[test]
fn test_config_partial_deserialization() {
    let json = r#"{"server": {"port": 9999}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.server.port, 9999);
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.idle.enabled);
}

#[test]
fn test_config_policy_from_allow_list() {
    let config = Config::default();
    let policy = config.auth_policy(Some("k".to_string()));

    assert!(policy.is_origin_allowed("http://localhost"));
    assert!(!policy.is_origin_allowed("https://elsewhere.example"));
    assert!(policy.requires_key());
}
