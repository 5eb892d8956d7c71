// Config loading and validation tests

use nasmon::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/nasmon.db"
max_pool_size = 10

[sampling]
timeout_ms = 2000
latency_target = "10.0.0.1"

[nas]
mount_point = "/mnt/nas"
share_name = "media"
latency_target = "127.0.0.1"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/nasmon.db");
    assert_eq!(config.sampling.timeout_ms, 2000);
    assert_eq!(config.sampling.latency_target.as_deref(), Some("10.0.0.1"));
    assert_eq!(config.nas.mount_point, "/mnt/nas");
    assert_eq!(config.nas.share_name, "media");
}

#[test]
fn test_config_defaults_when_omitted() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");
    assert_eq!(config.database.retention_days, 30);
    assert_eq!(config.database.prune_interval_secs, 3600);
    assert!(config.database.vacuum_schedule.is_none());
    assert_eq!(config.sampling.volume, "/");
    assert_eq!(config.nas.throughput_block_mb, 16);
    assert_eq!(config.nas.iops_operations, 100);
    assert_eq!(config.nas.iops_block_size, 4096);
    assert_eq!(config.nas.ping_timeout_ms, 800);
    assert_eq!(config.nas.io_timeout_ms, 15_000);
    assert_eq!(config.nas.file_count_limit, 100_000);
    assert!(config.nas.require_mount);
    assert_eq!(config.users.active_window_secs, 300);
    assert_eq!(config.users.cache_ttl_secs, 5);
    assert_eq!(config.users.share_port, 445);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/nasmon.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_sample_timeout_zero() {
    let bad = VALID_CONFIG.replace("timeout_ms = 2000", "timeout_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("sampling.timeout_ms"));
}

#[test]
fn test_config_validation_rejects_empty_mount_point() {
    let bad = VALID_CONFIG.replace("mount_point = \"/mnt/nas\"", "mount_point = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("nas.mount_point"));
}

#[test]
fn test_config_validation_rejects_second_long_ping() {
    let bad = VALID_CONFIG.replace(
        "share_name = \"media\"",
        "share_name = \"media\"\nping_timeout_ms = 1000",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("ping_timeout_ms"));
}

#[test]
fn test_config_validation_rejects_iops_operations_zero() {
    let bad = VALID_CONFIG.replace(
        "share_name = \"media\"",
        "share_name = \"media\"\niops_operations = 0",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("iops_operations"));
}

#[test]
fn test_config_accepts_cron_vacuum_schedule() {
    let with_cron = VALID_CONFIG.replace(
        "max_pool_size = 10",
        "max_pool_size = 10\nvacuum_schedule = \"0 0 3 * * *\"",
    );
    let config = AppConfig::load_from_str(&with_cron).expect("valid cron");
    assert_eq!(config.database.vacuum_schedule.as_deref(), Some("0 0 3 * * *"));
}

#[test]
fn test_config_validation_rejects_invalid_vacuum_schedule() {
    let bad = VALID_CONFIG.replace(
        "max_pool_size = 10",
        "max_pool_size = 10\nvacuum_schedule = \"every night\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("vacuum_schedule"));
}

#[test]
fn test_config_validation_rejects_missing_nas_section() {
    let without_nas = VALID_CONFIG
        .split("[nas]")
        .next()
        .unwrap()
        .to_string();
    assert!(AppConfig::load_from_str(&without_nas).is_err());
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.nas.mount_point, "/mnt/nas");
}
