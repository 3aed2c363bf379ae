//! 스트림 요청 모델.

use serde::{Deserialize, Serialize};

/// 하나의 논리적 요청 파라미터.
///
/// `reconnect()`는 마지막 `start()`의 요청을 그대로 재사용한다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// 사용자 입력
    pub input_text: String,
    /// 대화 세션 ID (불투명 문자열)
    pub session_id: String,
    /// Bearer 토큰 (있으면 토큰 모드, 없으면 테넌트 해시 레거시 모드)
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl StreamRequest {
    /// 새 요청 생성
    pub fn new(input_text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            session_id: session_id.into(),
            auth_token: None,
        }
    }

    /// Bearer 토큰 지정
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}
