//! 스트림 세션 포트.
//!
//! UI 레이어와의 양방향 계약. 콜백 세 개(`on_chunk`, `on_complete`, `on_error`)가
//! 코어가 위로 노출하는 유일한 출구다. `on_start`는 요청 수락 알림이며 기본 구현은 비어 있다.

use crate::error::StreamError;
use crate::models::metrics::MetricsSnapshot;
use crate::models::request::StreamRequest;

/// 스트림 콜백 수신자
///
/// 콜백은 세션 내부 잠금이 풀린 뒤 호출되므로 안에서 `stop()`을 불러도 된다.
pub trait StreamHandler: Send + Sync {
    /// 새 요청이 검증을 통과해 수락됨. 이 요청의 다른 콜백보다 먼저 호출된다.
    fn on_start(&self) {}

    /// 콘텐츠 델타 수신
    fn on_chunk(&self, delta: &str, accumulated: &str);

    /// 스트림 완료
    fn on_complete(&self, final_text: &str);

    /// 분류된 에러 (세션당 최대 한 번)
    fn on_error(&self, error: &StreamError);
}

/// 스트림 세션 제어
///
/// `StreamSession`(이벤트 전송)과 `ChunkedTransportSession`(바이트 스트림)이 구현한다.
pub trait StreamControl: Send + Sync {
    /// 새 요청 시작. 진행 중인 요청이 있으면 먼저 정리한다.
    fn start(&self, request: StreamRequest) -> Result<(), StreamError>;

    /// 중지. 어떤 상태에서든 여러 번 호출해도 안전하다.
    fn stop(&self);

    /// 마지막 요청을 쿨다운 후 새 연결로 재실행
    fn reconnect(&self) -> Result<(), StreamError>;

    /// 현재 메트릭 스냅샷
    fn metrics(&self) -> MetricsSnapshot;
}
