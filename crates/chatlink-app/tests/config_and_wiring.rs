//! 설정 및 와이어링 통합 테스트.
//!
//! 설정 파일 → 세션 설정 → 호스트 바인딩 구성 검증.

use chatlink_core::config::AppConfig;
use chatlink_core::config_manager::ConfigManager;
use chatlink_core::error::StreamError;
use chatlink_core::models::connection::TransportKind;
use chatlink_core::models::request::StreamRequest;
use chatlink_core::ports::activity::ActivitySource;
use chatlink_network::activity::ActivityMonitor;
use chatlink_network::host_binding::{transport_factory, BindingStatus, HostBinding};
use chatlink_network::stream_session::SessionSettings;
use tempfile::TempDir;

const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

#[test]
fn config_defaults_are_valid() {
    let config = AppConfig::default_config();

    assert!(!config.endpoint.url.is_empty());
    assert_eq!(config.endpoint.transport, TransportKind::PushEvent);

    let reconnect = &config.reconnect;
    assert!(reconnect.max_attempts > 0);
    assert!(reconnect.base_delay_ms <= reconnect.max_delay_ms);
    assert!((0.0..1.0).contains(&reconnect.jitter_ratio));
    assert!(reconnect.missed_keep_alive_threshold > 0);
    assert!(reconnect.reconnect_cooldown_ms > 0);
}

#[test]
fn partial_config_file_is_filled_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "endpoint": {
                "url": "https://chat.example.com/stream",
                "tenant_hash": "th_file",
                "transport": "chunked-stream"
            },
            "timeouts": { "idle_timeout_ms": 12000 }
        }"#,
    )
    .unwrap();

    let config = ConfigManager::with_path(path).unwrap().get();
    assert_eq!(config.endpoint.url, "https://chat.example.com/stream");
    assert_eq!(config.endpoint.transport, TransportKind::ChunkedStream);
    assert_eq!(config.reconnect, AppConfig::default_config().reconnect);

    let settings = SessionSettings::from_config(&config);
    assert_eq!(settings.optimal.idle_timeout_ms, 12_000);
}

#[test]
fn config_update_persists_across_managers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let manager = ConfigManager::with_path(path.clone()).unwrap();
    manager
        .update_with(|config| {
            config.endpoint.user_agent = Some(IPHONE_SAFARI.to_string());
            config.reconnect.max_attempts = 3;
        })
        .unwrap();

    let reloaded = ConfigManager::with_path(path).unwrap().get();
    assert_eq!(reloaded.endpoint.user_agent.as_deref(), Some(IPHONE_SAFARI));
    assert_eq!(reloaded.reconnect.max_attempts, 3);
}

#[test]
fn user_agent_selects_profile() {
    let mut config = AppConfig::default_config();
    let desktop = SessionSettings::from_config(&config);
    assert!(!desktop.optimal.background_handling_enabled);

    config.endpoint.user_agent = Some(IPHONE_SAFARI.to_string());
    let mobile = SessionSettings::from_config(&config);
    assert!(mobile.optimal.background_handling_enabled);
    assert!(mobile.optimal.keep_alive_interval_ms < desktop.optimal.keep_alive_interval_ms);
    assert!(mobile.optimal.idle_timeout_ms < desktop.optimal.idle_timeout_ms);
}

#[tokio::test]
async fn bindings_build_for_every_transport() {
    let monitor = ActivityMonitor::new();
    let activity: &dyn ActivitySource = &monitor;
    let mut config = AppConfig::default_config();
    config.endpoint.tenant_hash = Some("th".to_string());

    for kind in [TransportKind::PushEvent, TransportKind::ChunkedStream] {
        config.endpoint.transport = kind;
        let binding = HostBinding::from_config(&config, Some(activity), None).unwrap();
        assert_eq!(binding.snapshot().status, BindingStatus::Idle);
        assert!(transport_factory(kind).is_ok());
    }
}

#[tokio::test]
async fn missing_credentials_are_rejected_synchronously() {
    let config = AppConfig::default_config();
    for kind in [TransportKind::PushEvent, TransportKind::ChunkedStream] {
        let mut config = config.clone();
        config.endpoint.transport = kind;
        let binding = HostBinding::from_config(&config, None, None).unwrap();

        let error = binding
            .start(StreamRequest::new("hi", "s"))
            .expect_err("자격 증명 없이 시작됨");
        assert!(matches!(error, StreamError::Validation { .. }));
        assert_eq!(binding.snapshot().status, BindingStatus::Failed);
    }
}
