//! 프로토콜 프레임 모델.
//!
//! 스트림에서 파싱된 논리 레코드 하나. 일시적이며 저장되지 않는다.

/// 완료 신호 페이로드
pub const DONE_SENTINEL: &str = "[DONE]";

/// 파싱된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 콘텐츠 델타
    Chunk {
        /// 추가된 텍스트
        content: String,
    },
    /// 스트림 완료 (`[DONE]`)
    Done,
    /// 서버가 보낸 치명적 스트림 내 에러
    Error {
        /// 서버 메시지
        message: String,
    },
    /// keep-alive (콘텐츠 없음)
    Ping,
}

impl Frame {
    /// 텍스트 델타 프레임 생성
    pub fn chunk(content: impl Into<String>) -> Self {
        Frame::Chunk {
            content: content.into(),
        }
    }

    /// 스트림을 종료시키는 프레임인지
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Done | Frame::Error { .. })
    }
}
