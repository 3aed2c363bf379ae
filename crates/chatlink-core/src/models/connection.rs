//! 연결 모델.
//!
//! 전송 방식, 연결 상태 머신의 상태, 세대/식별 태그.

use serde::{Deserialize, Serialize};

/// 전송 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// 이벤트 단위 푸시 전송 (text/event-stream → 레코드 단위 전달)
    #[default]
    PushEvent,
    /// 원시 바이트 스트림 (레코드 조립은 수신측 책임)
    ChunkedStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::PushEvent => write!(f, "push-event"),
            TransportKind::ChunkedStream => write!(f, "chunked-stream"),
        }
    }
}

/// 연결 상태
///
/// `Disconnected`와 `Failed`만 활성 전송 없이 도달 가능한 상태다.
/// 백그라운드 여부는 상태가 아니라 별도 플래그로 관리한다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// 연결 없음
    #[default]
    Disconnected,
    /// 전송을 여는 중
    Connecting,
    /// 연결됨
    Connected,
    /// 재연결 대기 중 (백오프 타이머)
    Reconnecting,
    /// 재연결 한도 소진 — 새 `start()` 필요
    Failed,
}

impl ConnectionState {
    /// 활성 전송이 있을 수 있는 상태인지
    pub fn has_transport(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// 종료 상태인지
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// 전송 시도 식별 태그.
///
/// `generation`은 세션 세대(`start`/`stop`마다 증가),
/// `serial`은 세대 안에서의 전송 시도 번호.
/// 태그가 현재 값과 다른 이벤트는 이전 연결의 잔여 이벤트로 간주하고 버린다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTag {
    /// 세션 세대
    pub generation: u64,
    /// 세대 내 전송 시도 번호
    pub serial: u64,
}

/// 연결 정보 스냅샷 (읽기 전용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// 연결 URL
    pub url: Option<String>,
    /// 전송 방식
    pub transport_kind: TransportKind,
    /// 현재 상태
    pub state: ConnectionState,
    /// 연속 재연결 시도 횟수
    pub attempt_count: u32,
    /// 백그라운드 여부
    pub is_background: bool,
    /// 마지막 활동 이후 경과 시간 (밀리초)
    pub idle_for_ms: Option<u64>,
}
