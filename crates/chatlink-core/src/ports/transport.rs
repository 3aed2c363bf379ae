//! 전송 포트.
//!
//! 구현: `chatlink-network` crate (`SseTransport`, `HttpChunkedTransport`).
//!
//! 전송 계층의 자체 재시도는 신뢰하지 않는다. 전송은 열기/닫기와 원시 이벤트
//! 전달만 담당하고, 재연결 판단은 `ConnectionManager` 상태 머신이 한다.

use tokio::sync::mpsc;
use url::Url;

use crate::error::CoreError;
use crate::models::connection::{ConnectionTag, TransportKind};

/// 전송에서 올라오는 원시 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 연결 수립
    Open,
    /// 이벤트 단위 전송의 레코드 데이터 (`data:` 필드 결합 결과)
    Message(String),
    /// 바이트 스트림 전송의 원시 청크 (레코드 경계와 무관)
    Chunk(Vec<u8>),
    /// keep-alive (주석 레코드, ping 이벤트)
    KeepAlive,
    /// 전송 에러
    Error(String),
    /// 스트림 정상 종료 (EOF)
    Closed,
}

/// 태그가 붙은 전송 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    /// 이벤트를 발생시킨 전송 시도
    pub tag: ConnectionTag,
    /// 이벤트
    pub event: TransportEvent,
}

/// 전송 시도 하나에 묶인 이벤트 송신기.
///
/// 모든 이벤트에 열기 시점의 태그를 자동으로 붙인다.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    tag: ConnectionTag,
    tx: mpsc::UnboundedSender<TransportEnvelope>,
}

impl TransportEventSender {
    /// 새 송신기 생성
    pub fn new(tag: ConnectionTag, tx: mpsc::UnboundedSender<TransportEnvelope>) -> Self {
        Self { tag, tx }
    }

    /// 이 송신기의 태그
    pub fn tag(&self) -> ConnectionTag {
        self.tag
    }

    /// 이벤트 전송. 수신측이 사라졌으면 `false`.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportEnvelope {
                tag: self.tag,
                event,
            })
            .is_ok()
    }

    /// 수신측이 닫혔는지
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 네트워크 전송
///
/// 하나의 인스턴스가 여러 번 열리고 닫힐 수 있다. 동시에 열린 연결은 최대 하나.
pub trait Transport: Send {
    /// 전송 방식
    fn kind(&self) -> TransportKind;

    /// 연결 열기 (비동기 진행, 결과는 `events`로 전달)
    ///
    /// 이미 열린 연결이 있으면 먼저 닫는다.
    fn open(&mut self, url: &Url, events: TransportEventSender) -> Result<(), CoreError>;

    /// 연결 닫기. 진행 중인 작업을 중단하며 여러 번 호출해도 안전하다.
    fn close(&mut self);
}

/// 세션마다 새 전송 인스턴스를 만드는 팩토리
pub trait TransportFactory: Send + Sync {
    /// 새 전송 생성
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}
