use std::path::PathBuf;
use std::time::Duration;

use sandbox_bootstrap::{config::BootstrapConfig, models::CommandSpec, AppError};

fn sample_toml() -> &'static str {
    r#"
manifest_url = "http://localhost:4000/api/project-files"
workspace_root = "/tmp/sandbox"
env_allowlist = ["NODE_OPTIONS"]

[install]
command = "pnpm"
args = ["install", "--frozen-lockfile"]

[server]
command = "pnpm"
args = ["dev"]

[timeouts]
fetch_seconds = 10
readiness_seconds = 45
"#
}

#[test]
fn parses_full_config() {
    let config = BootstrapConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.manifest_url, "http://localhost:4000/api/project-files");
    assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/sandbox")));
    assert_eq!(
        config.install,
        CommandSpec::new("pnpm", ["install", "--frozen-lockfile"])
    );
    assert_eq!(config.server.to_string(), "pnpm dev");
    assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
    assert_eq!(config.readiness_timeout(), Some(Duration::from_secs(45)));
    assert_eq!(config.env_allowlist, vec!["NODE_OPTIONS".to_owned()]);
}

#[test]
fn minimal_config_uses_npm_defaults() {
    let config =
        BootstrapConfig::from_toml_str(r#"manifest_url = "https://example.test/files""#)
            .expect("valid config");

    assert_eq!(config.install.to_string(), "npm install");
    assert_eq!(config.server.to_string(), "npm run dev");
    assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    assert_eq!(config.readiness_timeout(), None);
    assert!(config.workspace_root.is_none());
    assert!(config.env_allowlist.is_empty());
}

#[test]
fn session_settings_carry_commands_and_timeout() {
    let config = BootstrapConfig::from_toml_str(sample_toml()).expect("valid config");
    let settings = config.session_settings();

    assert_eq!(settings.install, config.install);
    assert_eq!(settings.server, config.server);
    assert_eq!(settings.readiness_timeout, Some(Duration::from_secs(45)));

    let options = config.runtime_options();
    assert_eq!(options.root, config.workspace_root);
    assert_eq!(options.env_allowlist, config.env_allowlist);
}

#[test]
fn missing_manifest_url_is_rejected() {
    let err = BootstrapConfig::from_toml_str("[timeouts]\nfetch_seconds = 5\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn non_http_manifest_url_is_rejected() {
    let err = BootstrapConfig::from_toml_str(r#"manifest_url = "file:///etc/files.json""#)
        .unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("http")));
}

#[test]
fn unparsable_manifest_url_is_rejected() {
    let err = BootstrapConfig::from_toml_str(r#"manifest_url = "not a url""#).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_fetch_timeout_is_rejected() {
    let raw = r#"
manifest_url = "http://localhost:4000/api/project-files"

[timeouts]
fetch_seconds = 0
"#;
    let err = BootstrapConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("fetch_seconds")));
}

#[test]
fn empty_command_is_rejected() {
    let raw = r#"
manifest_url = "http://localhost:4000/api/project-files"

[server]
command = " "
"#;
    let err = BootstrapConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("server.command")));
}

#[test]
fn malformed_allowlist_entry_is_rejected() {
    let raw = r#"
manifest_url = "http://localhost:4000/api/project-files"
env_allowlist = ["A=B"]
"#;
    let err = BootstrapConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_missing_path_is_a_config_error() {
    let err = BootstrapConfig::load_from_path("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("failed to read config")));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bootstrap.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = BootstrapConfig::load_from_path(&path).expect("loaded");
    assert_eq!(config.server.args, vec!["dev".to_owned()]);
}

#[test]
fn overrides_replace_url_and_workspace() {
    let config = BootstrapConfig::from_toml_str(sample_toml())
        .expect("valid config")
        .with_overrides(
            Some("https://files.example.test/api/project-files".into()),
            Some(PathBuf::from("/srv/project")),
        )
        .expect("valid overrides");

    assert_eq!(
        config.manifest_url,
        "https://files.example.test/api/project-files"
    );
    assert_eq!(config.workspace_root, Some(PathBuf::from("/srv/project")));
    assert_eq!(config.install.to_string(), "pnpm install --frozen-lockfile");
}

#[test]
fn absent_overrides_keep_file_values() {
    let config = BootstrapConfig::from_toml_str(sample_toml())
        .expect("valid config")
        .with_overrides(None, None)
        .expect("valid config");

    assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/sandbox")));
}

#[test]
fn overridden_manifest_url_is_validated() {
    let err = BootstrapConfig::from_toml_str(sample_toml())
        .expect("valid config")
        .with_overrides(Some("ftp://example.test/files".into()), None)
        .unwrap_err();

    assert!(matches!(err, AppError::Config(_)));
    assert!(err.to_string().contains("http or https"), "got {err}");
}
