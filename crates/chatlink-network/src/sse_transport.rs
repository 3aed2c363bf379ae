//! SSE(Server-Sent Events) 전송.
//!
//! `Transport` 포트 구현. reqwest 응답 본문을 `eventsource-stream`으로 디코딩해
//! 레코드 단위 이벤트로 올린다. 자체 재시도는 하지 않는다. 에러가 나면 한 번 알리고
//! 끝나며, 재연결은 상위 상태 머신이 결정한다.

use chatlink_core::error::CoreError;
use chatlink_core::models::connection::TransportKind;
use chatlink_core::ports::transport::{Transport, TransportEvent, TransportEventSender};
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// SSE 전송 — `Transport` 포트 구현
pub struct SseTransport {
    http_client: reqwest::Client,
    task: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// 새 SSE 전송 생성
    pub fn new() -> Result<Self, CoreError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;
        Ok(Self::with_client(http_client))
    }

    /// 기존 HTTP 클라이언트 재사용
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            task: None,
        }
    }

    /// 수신 태스크가 실행 중인지
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PushEvent
    }

    fn open(&mut self, url: &Url, events: TransportEventSender) -> Result<(), CoreError> {
        self.close();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("tokio 런타임 없음: {}", e)))?;
        let task = runtime.spawn(run_event_stream(self.http_client.clone(), url.clone(), events));
        self.task = Some(task);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("SSE 수신 태스크 중단");
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_event_stream(client: reqwest::Client, url: Url, events: TransportEventSender) {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await;

    let response = match response {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!("SSE 연결 거부: HTTP {}", response.status());
            events.send(TransportEvent::Error(format!("HTTP {}", response.status())));
            return;
        }
        Err(e) => {
            warn!("SSE 요청 실패: {e}");
            events.send(TransportEvent::Error(format!("요청 실패: {e}")));
            return;
        }
    };

    info!("SSE 연결 수립됨");
    if !events.send(TransportEvent::Open) {
        return;
    }

    // 주석(`:`)으로 시작하는 청크는 디코더가 버리므로 여기서 keep-alive로 알린다
    let keep_alive = events.clone();
    let mut stream = response
        .bytes_stream()
        .inspect(move |chunk| {
            if chunk.as_ref().is_ok_and(|bytes| bytes.starts_with(b":")) {
                keep_alive.send(TransportEvent::KeepAlive);
            }
        })
        .eventsource();

    while let Some(item) = stream.next().await {
        let delivered = match item {
            Ok(event) if event.event == "ping" => events.send(TransportEvent::KeepAlive),
            Ok(event) => events.send(TransportEvent::Message(event.data)),
            Err(e) => {
                warn!("SSE 스트림 에러: {e}");
                events.send(TransportEvent::Error(format!("스트림 에러: {e}")));
                return;
            }
        };
        if !delivered {
            debug!("SSE 이벤트 수신측 종료");
            return;
        }
    }

    info!("SSE 스트림 종료");
    events.send(TransportEvent::Closed);
}
