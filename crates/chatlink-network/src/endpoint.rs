//! 스트리밍 연결 URL 생성.
//!
//! 두 가지 인증 모드:
//! - 토큰 모드: `jwt`, `user_input`, `session_id`
//! - 레거시 모드: `tenant_hash`, `user_input`, `session_id`
//!
//! 브라우저 힌트(`safari=1`, `mobile=1`)를 붙여 백엔드가 버퍼링을 조정하게 한다.

use chatlink_core::error::StreamError;
use chatlink_core::models::request::StreamRequest;
use url::Url;

use crate::capability::BrowserClassification;

/// 요청 인증 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Bearer 토큰 (`jwt` 파라미터)
    Token,
    /// 테넌트 해시 (`tenant_hash` 파라미터)
    Legacy,
}

/// 완성 백엔드 엔드포인트
#[derive(Debug, Clone, Default)]
pub struct StreamEndpoint {
    url: String,
    tenant_hash: Option<String>,
    classification: BrowserClassification,
}

impl StreamEndpoint {
    /// 새 엔드포인트
    pub fn new(url: &str, tenant_hash: Option<String>) -> Self {
        Self {
            url: url.trim().to_string(),
            tenant_hash: tenant_hash.filter(|h| !h.trim().is_empty()),
            classification: BrowserClassification::default(),
        }
    }

    /// 브라우저 분류 결과 지정 (URL 힌트에 사용)
    pub fn with_classification(mut self, classification: BrowserClassification) -> Self {
        self.classification = classification;
        self
    }

    /// 엔드포인트 URL 문자열
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 요청에 적용될 인증 모드
    pub fn auth_mode(&self, request: &StreamRequest) -> Option<AuthMode> {
        let has_token = request
            .auth_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if has_token {
            Some(AuthMode::Token)
        } else if self.tenant_hash.is_some() {
            Some(AuthMode::Legacy)
        } else {
            None
        }
    }

    /// 요청 검증 후 연결 URL 생성
    pub fn build_url(&self, request: &StreamRequest) -> Result<Url, StreamError> {
        if self.url.is_empty() {
            return Err(StreamError::validation("endpoint", "엔드포인트 URL이 비어 있음"));
        }
        let mut url = Url::parse(&self.url)
            .map_err(|e| StreamError::validation("endpoint", &format!("잘못된 URL: {e}")))?;
        if request.session_id.trim().is_empty() {
            return Err(StreamError::validation("session_id", "세션 ID가 비어 있음"));
        }
        if request.input_text.trim().is_empty() {
            return Err(StreamError::validation("input_text", "입력이 비어 있음"));
        }

        let mode = self.auth_mode(request).ok_or_else(|| {
            StreamError::validation("auth", "토큰 또는 테넌트 해시가 필요함")
        })?;

        {
            let mut query = url.query_pairs_mut();
            match mode {
                AuthMode::Token => {
                    let token = request.auth_token.as_deref().unwrap_or_default();
                    query.append_pair("jwt", token);
                }
                AuthMode::Legacy => {
                    let hash = self.tenant_hash.as_deref().unwrap_or_default();
                    query.append_pair("tenant_hash", hash);
                }
            }
            query
                .append_pair("user_input", &request.input_text)
                .append_pair("session_id", &request.session_id);
            for (key, value) in self.classification.url_hints() {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}
