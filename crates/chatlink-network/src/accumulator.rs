//! 콘텐츠 누적 버퍼와 메트릭 추적.
//!
//! 재연결 후 백엔드는 같은 `session_id`에 대해 응답을 처음부터 다시 보낸다.
//! [`ContentBuffer`]는 재전송 구간을 이미 전달한 내용과 비교해 건너뛰고,
//! 전달한 바이트를 절대 버리거나 순서를 바꾸지 않는다.

use chatlink_core::models::metrics::MetricsSnapshot;
use tokio::time::Instant;
use tracing::warn;

/// 추가 전용 콘텐츠 버퍼
#[derive(Debug, Default, Clone)]
pub struct ContentBuffer {
    text: String,
    /// 재전송 비교 위치 (재전송 중일 때만 Some)
    replay_pos: Option<usize>,
}

impl ContentBuffer {
    /// 빈 버퍼
    pub fn new() -> Self {
        Self::default()
    }

    /// 누적 텍스트
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// 누적 바이트 수
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// 비어 있는지
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 재전송 구간 시작 — 새 연결이 열릴 때 호출
    pub fn begin_replay(&mut self) {
        if !self.text.is_empty() {
            self.replay_pos = Some(0);
        }
    }

    /// 재전송 비교 중인지
    pub fn is_replaying(&self) -> bool {
        self.replay_pos.is_some()
    }

    /// 델타 추가. 실제로 새로 추가된 부분을 반환 (전부 재전송분이면 None).
    pub fn append(&mut self, delta: &str) -> Option<String> {
        let mut fresh = delta;

        if let Some(pos) = self.replay_pos {
            let delivered = &self.text[pos..];
            let common = common_prefix_len(delivered, delta);

            if common == delta.len() {
                let next = pos + common;
                self.replay_pos = (next < self.text.len()).then_some(next);
                return None;
            }
            if common < delivered.len() {
                warn!(
                    "재전송 응답이 이미 전달한 내용과 다름 ({}바이트 위치) — 나머지를 이어 붙임",
                    pos + common
                );
            }
            self.replay_pos = None;
            fresh = &delta[common..];
        }

        if fresh.is_empty() {
            return None;
        }
        self.text.push_str(fresh);
        Some(fresh.to_string())
    }

    /// 초기화 (새 요청)
    pub fn clear(&mut self) {
        self.text.clear();
        self.replay_pos = None;
    }
}

/// 문자 경계를 지키는 공통 접두사 길이 (바이트)
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum()
}

/// 세션 타이밍/카운터 추적
#[derive(Debug, Default, Clone)]
pub struct MetricsTracker {
    started_at: Option<Instant>,
    first_token_at: Option<Instant>,
    ended_at: Option<Instant>,
    token_count: u64,
    reconnection_attempts: u32,
    background_disconnections: u32,
}

impl MetricsTracker {
    /// 새 요청 시작 — 모든 값 초기화
    pub fn reset(&mut self, now: Instant) {
        *self = Self {
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// 콘텐츠 델타 수신
    pub fn record_token(&mut self, now: Instant) {
        self.token_count += 1;
        self.first_token_at.get_or_insert(now);
    }

    /// 재연결 시도
    pub fn record_reconnection(&mut self) {
        self.reconnection_attempts += 1;
    }

    /// 백그라운드 중 억제된 연결 끊김
    pub fn record_background_disconnection(&mut self) {
        self.background_disconnections += 1;
    }

    /// 종료 시각 확정 (최초 한 번만)
    pub fn finish(&mut self, now: Instant) {
        if self.started_at.is_some() {
            self.ended_at.get_or_insert(now);
        }
    }

    /// 수동 재연결로 세션 재개 — 종료 시각만 지운다
    pub fn resume(&mut self) {
        self.ended_at = None;
    }

    /// 종료 여부
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// 불변 스냅샷 생성
    pub fn snapshot(&self, now: Instant) -> MetricsSnapshot {
        let Some(started) = self.started_at else {
            return MetricsSnapshot::default();
        };

        let end = self.ended_at.unwrap_or(now);
        let total = end.saturating_duration_since(started);
        let tokens_per_second = if total.as_secs_f64() > 0.0 {
            self.token_count as f64 / total.as_secs_f64()
        } else {
            0.0
        };

        MetricsSnapshot {
            time_to_first_token_ms: self
                .first_token_at
                .map(|t| t.saturating_duration_since(started).as_millis() as u64),
            total_time_ms: Some(total.as_millis() as u64),
            token_count: self.token_count,
            tokens_per_second,
            reconnection_attempts: self.reconnection_attempts,
            background_disconnections: self.background_disconnections,
        }
    }
}
