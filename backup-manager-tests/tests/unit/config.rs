//! Unit tests for configuration loading and validation

use pg_backup_manager::config::{load_config, parse_config, validate_config};
use rstest::rstest;
use test_utils::{full_config_toml, minimal_config_toml, render, ConfigBuilder, LogFormat, StorageType, TestContext};
use std::path::Path;

/// TOML-safe path text
fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn rendered(template: &str, ctx: &TestContext) -> String {
    let root = ctx.temp_dir();
    let password_file = ctx.create_file("db-password", "secret\n");
    render(
        template,
        &[
            ("temp_dir", &toml_path(&root.join("tmp"))),
            ("log_dir", &toml_path(&root.join("logs"))),
            ("password_file", &toml_path(&password_file)),
            ("storage_path", &toml_path(&root.join("storage"))),
            ("audit_path", &toml_path(&root.join("audit.log"))),
        ],
    )
}

#[test]
fn test_load_minimal_config() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", &rendered(minimal_config_toml(), &ctx));

    let config = load_config(&path).unwrap();
    assert_eq!(config.database.identity(), "localhost:5432/appdb");
    assert_eq!(config.storage.storage_type, StorageType::Local);
    assert_eq!(config.global.artifact_prefix, "backup");
    assert!(config.global.serialize_operations);
    assert_eq!(config.global.log_format, LogFormat::Text);
    assert!(config.schedule.is_none());
}

#[test]
fn test_load_full_config() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", &rendered(full_config_toml(), &ctx));

    let config = load_config(&path).unwrap();
    assert_eq!(config.database.identity(), "db.internal:6543/orders");
    assert_eq!(config.database.user, "backup");
    assert_eq!(config.storage.storage_type, StorageType::S3);
    assert_eq!(config.storage.endpoint.as_deref(), Some("https://s3.example.com"));
    assert_eq!(config.storage.region, "eu-central-1");
    assert_eq!(config.global.artifact_prefix, "nightly");
    assert!(!config.global.serialize_operations);
    assert_eq!(config.global.log_format, LogFormat::Json);
    assert_eq!(config.global.log_max_files, 3);
    assert_eq!(config.audit.display_limit, 20);
    assert_eq!(config.schedule.unwrap().cron, "30 2 * * *");
    assert!(!config.notifications.discord_webhook_url.is_empty());
}

#[test]
fn test_missing_password_file_is_rejected() {
    let ctx = TestContext::new();
    let text = rendered(minimal_config_toml(), &ctx);
    let missing = toml_path(&ctx.temp_dir().join("no-such-file"));
    let password = toml_path(&ctx.temp_dir().join("db-password"));
    let path = ctx.create_file("config.toml", &text.replace(&password, &missing));

    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("password file"));
}

#[test]
fn test_missing_file_is_read_error() {
    let err = load_config("/nonexistent/backup-config.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[test]
fn test_unparseable_file() {
    let ctx = TestContext::new();
    let path = ctx.create_file("config.toml", "[global\nbroken");
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[rstest]
#[case("*/15 * * * *", true)]
#[case("0 2 * * 1-5", true)]
#[case("0 2 * *", false)]
#[case("61 * * * *", false)]
#[case("not a cron", false)]
fn test_schedule_validation(#[case] cron: &str, #[case] valid: bool) {
    let (config, _temp) = ConfigBuilder::minimal().with_schedule(cron).persist();
    assert_eq!(validate_config(&config).is_ok(), valid, "cron {:?}", cron);
}

#[rstest]
#[case("appdb", true)]
#[case("app_db_2", true)]
#[case("app db", false)]
#[case("app;drop", false)]
#[case("", false)]
fn test_database_name_validation(#[case] name: &str, #[case] valid: bool) {
    let (config, _temp) = ConfigBuilder::minimal().with_database_name(name).persist();
    assert_eq!(validate_config(&config).is_ok(), valid, "name {:?}", name);
}

#[test]
fn test_zero_display_limit_is_rejected() {
    let (config, _temp) = ConfigBuilder::minimal().with_display_limit(0).persist();
    assert!(validate_config(&config).is_err());
}

#[test]
fn test_builder_config_round_trips_through_toml() {
    let ctx = TestContext::with_minimal_config();
    let path = ctx.write_config();
    let text = std::fs::read_to_string(&path).unwrap();

    let parsed = parse_config(&text).unwrap();
    validate_config(&parsed).unwrap();
    assert_eq!(parsed.database.identity(), ctx.config().unwrap().database.identity());
}
