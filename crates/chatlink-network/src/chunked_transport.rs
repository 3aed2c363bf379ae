//! 바이트 스트림 전송.
//!
//! - [`HttpByteStream`]: `ByteStreamOpener` 포트 구현 (reqwest 응답 본문 스트림)
//! - [`ChunkedTransport`]: 바이트 스트림을 `Transport` 포트로 노출. 청크를 레코드
//!   경계와 무관하게 그대로 올리고, 레코드 조립은 세션이 한다.

use std::sync::Arc;

use async_trait::async_trait;
use chatlink_core::error::CoreError;
use chatlink_core::models::connection::TransportKind;
use chatlink_core::ports::byte_stream::{ByteChunkStream, ByteStreamOpener};
use chatlink_core::ports::transport::{Transport, TransportEvent, TransportEventSender};
use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// reqwest 기반 바이트 스트림 연결자
#[derive(Clone)]
pub struct HttpByteStream {
    http_client: reqwest::Client,
}

impl HttpByteStream {
    /// 새 연결자 생성
    pub fn new() -> Result<Self, CoreError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;
        Ok(Self { http_client })
    }

    /// 기존 HTTP 클라이언트 재사용
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ByteStreamOpener for HttpByteStream {
    async fn open(&self, url: &Url) -> Result<ByteChunkStream, CoreError> {
        let response = self
            .http_client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("요청 실패: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Network(format!("HTTP {}", status)));
        }

        debug!("바이트 스트림 응답 수신: {}", status);
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| CoreError::Network(format!("스트림 읽기 실패: {}", e)))
        });
        Ok(stream.boxed())
    }
}

/// 바이트 스트림 전송 — `Transport` 포트 구현
pub struct ChunkedTransport {
    opener: Arc<dyn ByteStreamOpener>,
    task: Option<JoinHandle<()>>,
}

impl ChunkedTransport {
    /// 연결자를 지정해 생성
    pub fn new(opener: Arc<dyn ByteStreamOpener>) -> Self {
        Self { opener, task: None }
    }

    /// reqwest 연결자로 생성
    pub fn http() -> Result<Self, CoreError> {
        Ok(Self::new(Arc::new(HttpByteStream::new()?)))
    }
}

impl Transport for ChunkedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ChunkedStream
    }

    fn open(&mut self, url: &Url, events: TransportEventSender) -> Result<(), CoreError> {
        self.close();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("tokio 런타임 없음: {}", e)))?;
        let task = runtime.spawn(pump_chunks(self.opener.clone(), url.clone(), events));
        self.task = Some(task);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("바이트 스트림 태스크 중단");
        }
    }
}

impl Drop for ChunkedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump_chunks(opener: Arc<dyn ByteStreamOpener>, url: Url, events: TransportEventSender) {
    let mut stream = match opener.open(&url).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("바이트 스트림 연결 실패: {}", e);
            events.send(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    info!("바이트 스트림 연결 수립됨");
    if !events.send(TransportEvent::Open) {
        return;
    }

    while let Some(chunk) = stream.next().await {
        let delivered = match chunk {
            Ok(bytes) => events.send(TransportEvent::Chunk(bytes)),
            Err(e) => {
                warn!("바이트 스트림 에러: {}", e);
                events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };
        if !delivered {
            return;
        }
    }

    info!("바이트 스트림 종료");
    events.send(TransportEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlink_core::models::connection::ConnectionTag;
    use chatlink_core::ports::transport::TransportEnvelope;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn http_byte_stream_yields_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("data: [DONE]\n\n")
            .create_async()
            .await;

        let opener = HttpByteStream::new().unwrap();
        let url = Url::parse(&format!("{}/stream?session_id=s", server.url())).unwrap();
        let mut stream = opener.open(&url).await.unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend(chunk.unwrap());
        }
        assert_eq!(body, b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn http_byte_stream_rejects_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/stream")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let opener = HttpByteStream::new().unwrap();
        let url = Url::parse(&format!("{}/stream", server.url())).unwrap();
        let result = opener.open(&url).await;
        assert!(matches!(result, Err(CoreError::Network(msg)) if msg.contains("401")));
    }

    struct StaticChunks(Vec<&'static [u8]>);

    #[async_trait]
    impl ByteStreamOpener for StaticChunks {
        async fn open(&self, _url: &Url) -> Result<ByteChunkStream, CoreError> {
            let chunks: Vec<Result<Vec<u8>, CoreError>> =
                self.0.iter().map(|c| Ok(c.to_vec())).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn transport_forwards_raw_chunks() {
        let opener = Arc::new(StaticChunks(vec![b"data: a", b"b\n\n"]));
        let mut transport = ChunkedTransport::new(opener);
        let (tx, mut rx) = mpsc::unbounded_channel::<TransportEnvelope>();
        let tag = ConnectionTag {
            generation: 2,
            serial: 1,
        };
        transport
            .open(
                &Url::parse("http://local.test/s").unwrap(),
                TransportEventSender::new(tag, tx),
            )
            .unwrap();

        let mut events = Vec::new();
        while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            assert_eq!(envelope.tag, tag);
            let closed = envelope.event == TransportEvent::Closed;
            events.push(envelope.event);
            if closed {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                TransportEvent::Open,
                TransportEvent::Chunk(b"data: a".to_vec()),
                TransportEvent::Chunk(b"b\n\n".to_vec()),
                TransportEvent::Closed,
            ]
        );
        assert_eq!(transport.kind(), TransportKind::ChunkedStream);
    }
}
