use std::path::PathBuf;

use media_uploader::config::{Config, RemoteBackend};
use media_uploader::storage::Settings;

fn local_config() -> Config {
    let mut config = Config::default();
    config.remote.backend = RemoteBackend::Local;
    config
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.agent.bind_address, "127.0.0.1:7111");
    assert_eq!(config.uploads.concurrent_uploads, 4);
    assert_eq!(config.remote.backend, RemoteBackend::Http);
    assert!(!config.uploads.watch);
}

#[test]
fn test_state_file_is_per_environment() {
    let mut config = local_config();
    config.agent.data_dir = "/var/lib/uploader".to_string();
    config.agent.environment = "staging".to_string();

    assert_eq!(
        config.state_file(),
        PathBuf::from("/var/lib/uploader/state_staging.msgpack")
    );
}

#[test]
fn test_http_backend_requires_token() {
    let mut config = Config::default();
    assert!(config.validate().is_err());

    config.remote.access_token = Some("token".to_string());
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_concurrency_is_invalid() {
    let mut config = local_config();
    config.uploads.concurrent_uploads = 0;

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("CONCURRENT_UPLOADS"));
}

#[test]
fn test_overrides_apply_only_when_set() {
    let mut config = local_config();
    let mut settings = Settings::default();
    assert!(!config.apply_overrides(&mut settings));

    config.uploads.upload_video = Some(false);
    config.uploads.upload_images = Some(true);
    assert!(config.apply_overrides(&mut settings));
    assert!(!settings.upload_video);
    assert!(settings.upload_images);
    assert!(settings.upload_raw);

    assert!(!config.apply_overrides(&mut settings));
}
