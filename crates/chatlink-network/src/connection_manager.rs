//! 연결 상태 머신.
//!
//! 전송 하나를 소유하고 원시 전송 이벤트를 재시도 인지 이벤트로 변환한다.
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED → {RECONNECTING ⇄ CONNECTING} → FAILED
//! ```
//!
//! - 모든 메서드는 동기이며 현재 시각(`now`)을 인자로 받는다. 타이머는 데드라인으로만
//!   기록되고, 구동 태스크가 [`ConnectionManager::poll_timers`]로 만료를 처리한다.
//! - 백그라운드 중 발생한 전송 에러는 사용자 에러로 올리지 않고 재연결 경로로 흡수한다.
//! - 세션마다 새 인스턴스를 만든다. 프로세스 전역 싱글턴이 아니다.

use std::time::Duration;

use chatlink_core::config::ReconnectConfig;
use chatlink_core::error::{ConnectionPhase, CoreError};
use chatlink_core::models::connection::{
    ConnectionInfo, ConnectionState, ConnectionTag, TransportKind,
};
use chatlink_core::ports::transport::{
    Transport, TransportEnvelope, TransportEvent, TransportEventSender,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::capability::OptimalConfig;
use crate::timers::TimerSet;

/// 상태 머신 설정
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// 최대 재연결 시도 횟수
    pub max_attempts: u32,
    /// 백오프 정책
    pub backoff: BackoffPolicy,
    /// 시도 횟수 리셋에 필요한 연결 유지 시간
    pub min_stable: Duration,
    /// keep-alive 검사 주기
    pub keep_alive_interval: Duration,
    /// keep-alive 누락 허용 횟수
    pub missed_keep_alive_threshold: u32,
    /// 포그라운드 복귀 시 건강 판정 윈도우
    pub health_window: Duration,
    /// 백그라운드 최대 유지 시간
    pub max_background: Duration,
    /// 백그라운드 처리 활성화
    pub background_handling: bool,
}

impl ManagerConfig {
    /// 재연결 설정 + 브라우저 권장 설정으로 생성
    pub fn new(reconnect: &ReconnectConfig, optimal: &OptimalConfig) -> Self {
        Self {
            max_attempts: reconnect.max_attempts,
            backoff: BackoffPolicy::from_config(reconnect),
            min_stable: reconnect.min_stable(),
            keep_alive_interval: optimal.keep_alive_interval(),
            missed_keep_alive_threshold: reconnect.missed_keep_alive_threshold.max(1),
            health_window: reconnect.health_window(),
            max_background: reconnect.max_background(),
            background_handling: optimal.background_handling_enabled,
        }
    }

    /// 연결이 죽었다고 판단하는 무활동 시간
    pub fn stale_after(&self) -> Duration {
        self.keep_alive_interval
            .saturating_mul(self.missed_keep_alive_threshold)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default(), &OptimalConfig::default())
    }
}

/// 전송 실패 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    /// 실패 단계
    pub phase: ConnectionPhase,
    /// 원인 (로그용, 사용자에게 노출하지 않음)
    pub reason: String,
}

/// 상태 머신이 내보내는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// 전송 열기 시작 (`attempt` = 현재 연속 실패 횟수)
    Connecting { attempt: u32 },
    /// 연결 수립
    Open,
    /// 레코드 데이터 수신 (이벤트 전송)
    Message(String),
    /// 원시 바이트 수신 (청크 전송)
    Bytes(Vec<u8>),
    /// keep-alive 수신
    KeepAlive,
    /// 전송 에러 (`suppressed` = 백그라운드라서 억제됨)
    Error {
        failure: ConnectionFailure,
        suppressed: bool,
    },
    /// 전송 종료 (`suppressed` = 백그라운드라서 억제됨)
    Close {
        failure: ConnectionFailure,
        suppressed: bool,
    },
    /// 재연결 예약
    Reconnecting { attempt: u32, delay: Duration },
    /// 재연결 한도 소진 — 종료 상태
    Failed {
        failure: ConnectionFailure,
        attempts: u32,
    },
    /// 백그라운드 진입
    BackgroundEntered,
    /// 포그라운드 복귀
    BackgroundExited {
        background_for: Duration,
        healthy: bool,
    },
    /// 포그라운드 복귀 건강 검사 실패 — 세션 재연결 필요
    ReconnectNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum ManagerTimer {
    Reconnect,
    KeepAlive,
    Stability,
    BackgroundLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Error,
    Close,
}

/// 연결 상태 머신
pub struct ConnectionManager {
    config: ManagerConfig,
    transport: Box<dyn Transport>,
    events_tx: mpsc::UnboundedSender<TransportEnvelope>,
    generation: u64,
    serial: u64,
    url: Option<Url>,
    state: ConnectionState,
    attempt_count: u32,
    connected_at: Option<Instant>,
    last_activity_at: Option<Instant>,
    is_background: bool,
    background_since: Option<Instant>,
    transport_open: bool,
    timers: TimerSet<ManagerTimer>,
}

impl ConnectionManager {
    /// 새 상태 머신 생성
    ///
    /// `generation`은 이 인스턴스가 여는 모든 전송 태그에 기록된다.
    pub fn new(
        config: ManagerConfig,
        transport: Box<dyn Transport>,
        events_tx: mpsc::UnboundedSender<TransportEnvelope>,
        generation: u64,
    ) -> Self {
        Self {
            config,
            transport,
            events_tx,
            generation,
            serial: 0,
            url: None,
            state: ConnectionState::Disconnected,
            attempt_count: 0,
            connected_at: None,
            last_activity_at: None,
            is_background: false,
            background_since: None,
            transport_open: false,
            timers: TimerSet::new(),
        }
    }

    /// 현재 상태
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 연속 재연결 시도 횟수
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// 백그라운드 여부
    pub fn is_background(&self) -> bool {
        self.is_background
    }

    /// 마지막 활동 시각
    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    /// 전송 방식
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// 현재 전송 시도 태그
    pub fn current_tag(&self) -> ConnectionTag {
        ConnectionTag {
            generation: self.generation,
            serial: self.serial,
        }
    }

    /// 대기 중인 타이머 수
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// 가장 이른 타이머 데드라인
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// 연결 정보 스냅샷
    pub fn info(&self, now: Instant) -> ConnectionInfo {
        ConnectionInfo {
            url: self.url.as_ref().map(|u| u.to_string()),
            transport_kind: self.transport.kind(),
            state: self.state,
            attempt_count: self.attempt_count,
            is_background: self.is_background,
            idle_for_ms: self
                .last_activity_at
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
        }
    }

    /// 연결 시작 (DISCONNECTED/FAILED → CONNECTING)
    pub fn connect(&mut self, url: Url, now: Instant) -> Result<Vec<ManagerEvent>, CoreError> {
        if !self.state.is_terminal() {
            return Err(CoreError::Internal(format!(
                "연결 시작 불가 — 현재 상태: {}",
                self.state
            )));
        }

        info!("연결 시작: {} ({})", redact(&url), self.transport.kind());
        self.url = Some(url);
        self.attempt_count = 0;
        self.timers.clear();
        if self.is_background {
            self.arm_background_limit(now);
        }

        let mut events = Vec::new();
        self.open_transport(now, &mut events);
        Ok(events)
    }

    /// 전송 이벤트 처리
    pub fn handle_transport(
        &mut self,
        envelope: TransportEnvelope,
        now: Instant,
    ) -> Vec<ManagerEvent> {
        let mut events = Vec::new();

        if envelope.tag != self.current_tag() || !self.transport_open {
            debug!("이전 연결의 이벤트 무시: {:?}", envelope.tag);
            return events;
        }

        match envelope.event {
            TransportEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.connected_at = Some(now);
                    self.last_activity_at = Some(now);
                    self.timers
                        .arm(ManagerTimer::Stability, now + self.config.min_stable);
                    self.timers
                        .arm(ManagerTimer::KeepAlive, now + self.config.keep_alive_interval);
                    info!("연결 수립 (시도 {})", self.attempt_count);
                    events.push(ManagerEvent::Open);
                }
            }
            TransportEvent::Message(data) => {
                if self.accepts_data(now) {
                    events.push(ManagerEvent::Message(data));
                }
            }
            TransportEvent::Chunk(bytes) => {
                if self.accepts_data(now) {
                    events.push(ManagerEvent::Bytes(bytes));
                }
            }
            TransportEvent::KeepAlive => {
                if self.accepts_data(now) {
                    debug!("keep-alive 수신");
                    events.push(ManagerEvent::KeepAlive);
                }
            }
            TransportEvent::Error(reason) => {
                self.handle_failure(FailureKind::Error, reason, now, &mut events);
            }
            TransportEvent::Closed => {
                self.handle_failure(
                    FailureKind::Close,
                    "서버가 스트림을 닫음".to_string(),
                    now,
                    &mut events,
                );
            }
        }

        events
    }

    /// 만료된 타이머 처리
    pub fn poll_timers(&mut self, now: Instant) -> Vec<ManagerEvent> {
        let mut events = Vec::new();

        for timer in self.timers.take_expired(now) {
            match timer {
                ManagerTimer::Reconnect => {
                    if self.state == ConnectionState::Reconnecting {
                        self.open_transport(now, &mut events);
                    }
                }
                ManagerTimer::KeepAlive => self.check_keep_alive(now, &mut events),
                ManagerTimer::Stability => {
                    if self.state == ConnectionState::Connected && self.attempt_count > 0 {
                        debug!("연결 안정화 — 재연결 시도 횟수 리셋");
                        self.attempt_count = 0;
                    }
                }
                ManagerTimer::BackgroundLimit => self.park_in_background(now),
            }
        }

        events
    }

    /// 포그라운드/백그라운드 신호 처리
    ///
    /// 상태는 바꾸지 않고 플래그만 바꾼다. 포그라운드 복귀 시 건강 검사를 하고,
    /// 실패하면 `ReconnectNeeded`를 정확히 한 번 내보낸다.
    pub fn set_background(&mut self, background: bool, now: Instant) -> Vec<ManagerEvent> {
        let mut events = Vec::new();

        if !self.config.background_handling {
            debug!("백그라운드 처리 비활성 — 신호 무시");
            return events;
        }
        if background == self.is_background {
            return events;
        }

        if background {
            self.is_background = true;
            self.background_since = Some(now);
            if !self.state.is_terminal() {
                self.arm_background_limit(now);
            }
            info!("백그라운드 진입 (상태: {})", self.state);
            events.push(ManagerEvent::BackgroundEntered);
            return events;
        }

        self.is_background = false;
        self.timers.cancel(ManagerTimer::BackgroundLimit);
        let background_for = self
            .background_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();

        let healthy = self.is_healthy(now);
        info!(
            "포그라운드 복귀 — 백그라운드 {}ms, 상태 {}, 건강 {}",
            background_for.as_millis(),
            self.state,
            healthy
        );
        events.push(ManagerEvent::BackgroundExited {
            background_for,
            healthy,
        });

        // 백그라운드 중 시작된 연결 시도도 스로틀링으로 멈췄을 수 있으므로 포함
        if !healthy && !self.state.is_terminal() {
            warn!("포그라운드 건강 검사 실패 — 재연결 요청");
            events.push(ManagerEvent::ReconnectNeeded);
        }

        events
    }

    /// 건강 판정: CONNECTED이고 마지막 활동이 건강 윈도우 안
    pub fn is_healthy(&self, now: Instant) -> bool {
        self.state == ConnectionState::Connected
            && self
                .last_activity_at
                .is_some_and(|t| now.saturating_duration_since(t) < self.config.health_window)
    }

    /// 강제 종료. 어떤 상태에서든 유효하며, 두 번째 호출부터는 no-op.
    pub fn disconnect(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected
            && !self.transport_open
            && self.timers.pending() == 0
        {
            return false;
        }

        self.close_transport();
        self.timers.clear();
        self.state = ConnectionState::Disconnected;
        self.attempt_count = 0;
        self.connected_at = None;
        info!("연결 해제");
        true
    }

    fn accepts_data(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Connected {
            debug!("연결 전 데이터 무시 (상태: {})", self.state);
            return false;
        }
        self.last_activity_at = Some(now);
        true
    }

    fn open_transport(&mut self, now: Instant, events: &mut Vec<ManagerEvent>) {
        let Some(url) = self.url.clone() else {
            warn!("URL 없이 전송 열기 시도");
            return;
        };

        self.serial += 1;
        self.state = ConnectionState::Connecting;
        self.connected_at = None;
        let sender = TransportEventSender::new(self.current_tag(), self.events_tx.clone());

        events.push(ManagerEvent::Connecting {
            attempt: self.attempt_count,
        });
        debug!(
            "전송 열기: serial={}, 시도={}",
            self.serial, self.attempt_count
        );

        match self.transport.open(&url, sender) {
            Ok(()) => self.transport_open = true,
            Err(e) => {
                // 열기 실패는 전송 에러와 같은 경로
                self.transport_open = true;
                self.handle_failure(FailureKind::Error, e.to_string(), now, events);
            }
        }
    }

    fn handle_failure(
        &mut self,
        kind: FailureKind,
        reason: String,
        now: Instant,
        events: &mut Vec<ManagerEvent>,
    ) {
        let phase = match (self.state, kind) {
            (ConnectionState::Connecting, _) => ConnectionPhase::ConnectingFailed,
            (ConnectionState::Connected, FailureKind::Error) => {
                ConnectionPhase::InterruptedWhileOpen
            }
            (ConnectionState::Connected, FailureKind::Close) => ConnectionPhase::ClosedByServer,
            _ => {
                debug!("활성 전송 없음 — 실패 이벤트 무시 ({})", self.state);
                return;
            }
        };

        self.settle_stability(now);
        // 네이티브 자동 재시도를 막기 위해 즉시 닫는다
        self.close_transport();
        self.timers.cancel(ManagerTimer::KeepAlive);
        self.timers.cancel(ManagerTimer::Stability);
        self.connected_at = None;

        let failure = ConnectionFailure { phase, reason };
        let suppressed = self.is_background && self.config.background_handling;

        if suppressed {
            info!(
                "백그라운드 중 연결 끊김 억제 ({}): {}",
                phase.as_str(),
                failure.reason
            );
        } else {
            warn!("연결 실패 ({}): {}", phase.as_str(), failure.reason);
        }

        events.push(match kind {
            FailureKind::Error => ManagerEvent::Error {
                failure: failure.clone(),
                suppressed,
            },
            FailureKind::Close => ManagerEvent::Close {
                failure: failure.clone(),
                suppressed,
            },
        });

        if self.attempt_count < self.config.max_attempts {
            self.schedule_reconnect(now, events);
        } else if suppressed {
            // 한도 소진: 타이머 없이 대기하고 포그라운드 건강 검사에 맡긴다
            info!(
                "백그라운드 중 재연결 한도 소진 ({}회) — 복귀 시 재연결",
                self.attempt_count
            );
            self.park();
        } else {
            self.state = ConnectionState::Failed;
            self.timers.clear();
            warn!("재연결 한도 소진 ({}회) — FAILED", self.attempt_count);
            events.push(ManagerEvent::Failed {
                failure,
                attempts: self.attempt_count,
            });
        }
    }

    fn schedule_reconnect(&mut self, now: Instant, events: &mut Vec<ManagerEvent>) {
        let delay = self.config.backoff.delay(self.attempt_count);
        self.attempt_count += 1;
        self.state = ConnectionState::Reconnecting;
        self.timers.arm(ManagerTimer::Reconnect, now + delay);
        info!(
            "재연결 예약: {}ms 후 (시도 {}/{})",
            delay.as_millis(),
            self.attempt_count,
            self.config.max_attempts
        );
        events.push(ManagerEvent::Reconnecting {
            attempt: self.attempt_count,
            delay,
        });
    }

    fn check_keep_alive(&mut self, now: Instant, events: &mut Vec<ManagerEvent>) {
        if self.state != ConnectionState::Connected {
            return;
        }

        // 백그라운드에서는 타이머가 스로틀링되므로 판정하지 않음 (복귀 시 건강 검사)
        if !self.is_background {
            let silent_for = self
                .last_activity_at
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or_default();
            if silent_for >= self.config.stale_after() {
                warn!("keep-alive 누락 {}ms — 연결 정체로 판단", silent_for.as_millis());
                self.handle_failure(
                    FailureKind::Error,
                    format!("{}ms 동안 활동 없음", silent_for.as_millis()),
                    now,
                    events,
                );
                return;
            }
        }

        self.timers
            .arm(ManagerTimer::KeepAlive, now + self.config.keep_alive_interval);
    }

    fn park_in_background(&mut self, now: Instant) {
        if !self.is_background || self.state.is_terminal() {
            return;
        }
        info!(
            "백그라운드 {}ms 초과 — 전송을 닫고 복귀 시 재연결",
            self.config.max_background.as_millis()
        );
        self.settle_stability(now);
        self.park();
    }

    /// 전송을 닫고 타이머 없이 RECONNECTING으로 대기
    fn park(&mut self) {
        self.close_transport();
        self.timers.cancel(ManagerTimer::Reconnect);
        self.timers.cancel(ManagerTimer::KeepAlive);
        self.timers.cancel(ManagerTimer::Stability);
        self.connected_at = None;
        self.state = ConnectionState::Reconnecting;
    }

    fn arm_background_limit(&mut self, now: Instant) {
        self.timers
            .arm(ManagerTimer::BackgroundLimit, now + self.config.max_background);
    }

    fn settle_stability(&mut self, now: Instant) {
        let stable = self
            .connected_at
            .is_some_and(|t| now.saturating_duration_since(t) >= self.config.min_stable);
        if self.state == ConnectionState::Connected && stable {
            self.attempt_count = 0;
        }
    }

    fn close_transport(&mut self) {
        if self.transport_open {
            self.transport.close();
            self.transport_open = false;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_transport();
    }
}

/// 로그용 URL — 쿼리(토큰, 사용자 입력) 제거
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
