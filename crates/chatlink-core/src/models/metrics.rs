//! 스트림 메트릭 스냅샷.
//!
//! 세션의 타임스탬프/카운터로부터 계산된 값 객체.
//! 생성 후 변경되지 않으므로 네트워크 콜백과 UI 읽기 사이에 경합이 없다.

use serde::{Deserialize, Serialize};

/// 메트릭 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// 시작부터 첫 토큰까지 (밀리초)
    pub time_to_first_token_ms: Option<u64>,
    /// 시작부터 종료(또는 현재)까지 (밀리초)
    pub total_time_ms: Option<u64>,
    /// 수신한 콘텐츠 델타 수
    pub token_count: u64,
    /// 초당 토큰 수
    pub tokens_per_second: f64,
    /// 재연결 시도 횟수
    pub reconnection_attempts: u32,
    /// 백그라운드 중 억제된 연결 끊김 횟수
    pub background_disconnections: u32,
}
