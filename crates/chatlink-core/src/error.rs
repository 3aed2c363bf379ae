//! chatlink 핵심 에러 타입.
//!
//! - [`CoreError`]: 설정/직렬화/네트워크 등 인프라 레벨 에러.
//! - [`StreamError`]: UI 레이어로 올라가는 분류된 스트림 에러.
//!   원시 전송 예외는 절대 그대로 노출하지 않는다.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 코어 레이어 에러.
/// 직렬화, 설정, 유효성 검증 등 도메인 공통 에러를 정의한다.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 — {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 네트워크 에러 (연결 실패, 응답 오류)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// URL 파싱 실패
    #[error("잘못된 URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}

/// 전송 실패가 발생한 연결 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPhase {
    /// 연결 수립 전에 실패
    ConnectingFailed,
    /// 열린 연결이 에러로 끊김
    InterruptedWhileOpen,
    /// 서버가 완료 신호 없이 스트림을 닫음
    ClosedByServer,
}

impl ConnectionPhase {
    /// 로그/직렬화용 식별자
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::ConnectingFailed => "connecting-failed",
            ConnectionPhase::InterruptedWhileOpen => "interrupted-while-open",
            ConnectionPhase::ClosedByServer => "closed-by-server",
        }
    }
}

/// 타임아웃 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutPhase {
    /// 연결 타임아웃 (open 이벤트 없음)
    Connect,
    /// 연결 후 유휴 타임아웃 (프레임 없음)
    Idle,
}

/// 스트림 에러 분류.
///
/// 호출자에게는 세션당 최대 한 번만 전달된다.
/// 백그라운드 중 발생한 전송 에러는 여기 포함되지 않는다 (내부에서 재연결로 흡수).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamError {
    /// 요청 파라미터 누락/오류 — 재시도 없음
    #[error("유효성 검증 실패 — {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 재연결 한도 소진 후의 연결 실패
    #[error("연결 실패 ({}), {attempts}회 시도", .phase.as_str())]
    Connection {
        /// 실패 단계
        phase: ConnectionPhase,
        /// 소진된 재연결 시도 횟수
        attempts: u32,
    },

    /// 프로토콜 위반 또는 서버가 보낸 스트림 내 에러
    #[error("프로토콜 에러: {message}")]
    Protocol {
        /// 서버 메시지 또는 파싱 실패 사유
        message: String,
    },

    /// 연결/유휴 타임아웃
    #[error("타임아웃 ({phase:?}): {after_ms}ms 초과")]
    Timeout {
        /// 타임아웃 단계
        phase: TimeoutPhase,
        /// 적용된 타임아웃 (밀리초)
        after_ms: u64,
    },
}

impl StreamError {
    /// 유효성 검증 에러 생성 헬퍼
    pub fn validation(field: &str, message: &str) -> Self {
        StreamError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// UI에 표시할 사람이 읽을 수 있는 메시지
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Validation { field, .. } => {
                format!("요청을 보낼 수 없습니다: '{field}' 값이 올바르지 않습니다.")
            }
            StreamError::Connection { phase, .. } => match phase {
                ConnectionPhase::ConnectingFailed => {
                    "서버에 연결할 수 없습니다. 네트워크 상태를 확인한 뒤 다시 시도해 주세요."
                        .to_string()
                }
                ConnectionPhase::InterruptedWhileOpen => {
                    "응답을 받는 중 연결이 끊어졌습니다. 다시 시도해 주세요.".to_string()
                }
                ConnectionPhase::ClosedByServer => {
                    "서버가 응답을 끝까지 보내지 않고 연결을 종료했습니다.".to_string()
                }
            },
            StreamError::Protocol { .. } => {
                "응답을 처리하는 중 문제가 발생했습니다. 다시 시도해 주세요.".to_string()
            }
            StreamError::Timeout { phase, .. } => match phase {
                TimeoutPhase::Connect => {
                    "서버 응답이 너무 늦습니다. 잠시 후 다시 시도해 주세요.".to_string()
                }
                TimeoutPhase::Idle => "응답이 중간에 멈췄습니다. 다시 시도해 주세요.".to_string(),
            },
        }
    }

    /// 타임아웃 분류 여부
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }
}
