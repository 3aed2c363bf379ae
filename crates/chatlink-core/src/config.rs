//! 애플리케이션 설정 구조체.
//!
//! 완성 백엔드 엔드포인트, 재연결 정책, 타임아웃 오버라이드를 정의한다.
//! [`crate::config_manager::ConfigManager`]를 통해 JSON 파일에서 로드.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::connection::TransportKind;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 완성 백엔드 엔드포인트 설정
    pub endpoint: EndpointConfig,
    /// 재연결/keep-alive 정책
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// 브라우저 프로필 타임아웃 오버라이드
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

// ============================================================
// 엔드포인트 설정
// ============================================================

/// 완성 백엔드 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// 스트리밍 엔드포인트 URL (예: "https://chat.example.com/stream")
    pub url: String,
    /// 레거시 인증용 테넌트 해시 (토큰이 없을 때 사용)
    #[serde(default)]
    pub tenant_hash: Option<String>,
    /// 기본 전송 방식
    #[serde(default)]
    pub transport: TransportKind,
    /// 브라우저 분류에 사용할 User-Agent (없으면 데스크톱 기본 프로필)
    #[serde(default)]
    pub user_agent: Option<String>,
}

// ============================================================
// 재연결 정책
// ============================================================

/// 재연결/keep-alive 정책 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 최대 재연결 시도 횟수 (초과 시 FAILED)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 백오프 기본 지연 (밀리초)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 백오프 최대 지연 (밀리초)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 지터 비율 (0.1 = ±10%)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// 이 시간 이상 연결이 유지되어야 시도 횟수 리셋 (밀리초)
    #[serde(default = "default_min_stable_ms")]
    pub min_stable_ms: u64,
    /// keep-alive 누락 허용 횟수
    #[serde(default = "default_missed_keep_alive_threshold")]
    pub missed_keep_alive_threshold: u32,
    /// 포그라운드 복귀 시 건강 판정 윈도우 (밀리초)
    #[serde(default = "default_health_window_ms")]
    pub health_window_ms: u64,
    /// 백그라운드 최대 유지 시간 — 초과 시 연결 해제 후 복귀 시 재연결 (밀리초)
    #[serde(default = "default_max_background_ms")]
    pub max_background_ms: u64,
    /// 수동 재연결 전 쿨다운 (밀리초)
    #[serde(default = "default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,
}

impl ReconnectConfig {
    /// 백오프 기본 지연
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// 백오프 최대 지연
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// 안정 연결 판정 시간
    pub fn min_stable(&self) -> Duration {
        Duration::from_millis(self.min_stable_ms)
    }

    /// 건강 판정 윈도우
    pub fn health_window(&self) -> Duration {
        Duration::from_millis(self.health_window_ms)
    }

    /// 백그라운드 최대 유지 시간
    pub fn max_background(&self) -> Duration {
        Duration::from_millis(self.max_background_ms)
    }

    /// 재연결 쿨다운
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            min_stable_ms: default_min_stable_ms(),
            missed_keep_alive_threshold: default_missed_keep_alive_threshold(),
            health_window_ms: default_health_window_ms(),
            max_background_ms: default_max_background_ms(),
            reconnect_cooldown_ms: default_reconnect_cooldown_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_min_stable_ms() -> u64 {
    5_000
}

fn default_missed_keep_alive_threshold() -> u32 {
    2
}

fn default_health_window_ms() -> u64 {
    30_000
}

fn default_max_background_ms() -> u64 {
    300_000
}

fn default_reconnect_cooldown_ms() -> u64 {
    500
}

// ============================================================
// 타임아웃 오버라이드
// ============================================================

/// 브라우저 프로필 기본값을 덮어쓰는 타임아웃 설정.
/// `None`이면 분류기가 추천한 값을 그대로 사용한다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    /// 연결 타임아웃 (밀리초)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// 연결 후 유휴 타임아웃 (밀리초)
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    /// keep-alive 주기 (밀리초)
    #[serde(default)]
    pub keep_alive_interval_ms: Option<u64>,
}

impl AppConfig {
    /// 기본 설정 생성
    pub fn default_config() -> Self {
        Self {
            endpoint: EndpointConfig {
                url: "http://localhost:8000/stream".to_string(),
                tenant_hash: None,
                transport: TransportKind::PushEvent,
                user_agent: None,
            },
            reconnect: ReconnectConfig::default(),
            timeouts: TimeoutOverrides::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay(), Duration::from_secs(1));
        assert_eq!(config.max_delay(), Duration::from_secs(30));
        assert!((config.jitter_ratio - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.cooldown(), Duration::from_millis(500));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"endpoint": {"url": "https://chat.example.com/stream"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.endpoint.url, "https://chat.example.com/stream");
        assert_eq!(config.endpoint.transport, TransportKind::PushEvent);
        assert!(config.endpoint.tenant_hash.is_none());
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.timeouts, TimeoutOverrides::default());
    }

    #[test]
    fn transport_kind_from_json() {
        let json = r#"{"endpoint": {"url": "http://x", "transport": "chunked-stream"}, "reconnect": {"max_attempts": 2}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoint.transport, TransportKind::ChunkedStream);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
    }
}
