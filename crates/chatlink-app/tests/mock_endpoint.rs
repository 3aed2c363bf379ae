//! 스트리밍 엔드포인트 목 서버.
//!
//! Axum 기반. 요청마다 준비된 응답을 순서대로 내보내고 쿼리를 기록한다.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chatlink_core::error::StreamError;
use chatlink_core::ports::stream::StreamHandler;
use chatlink_network::host_binding::{BindingSnapshot, BindingStatus};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

/// 요청 하나에 대한 응답 계획
#[derive(Debug, Clone)]
pub enum Reply {
    /// 청크를 보내고 본문 종료
    Chunks(Vec<String>),
    /// 청크를 보낸 뒤 연결을 열어 둠
    ChunksThenHold(Vec<String>),
    /// 청크를 보내고 잠시 뒤 본문 종료
    ChunksThenClose(Vec<String>, Duration),
    /// 에러 상태 코드
    Status(u16),
}

impl Reply {
    pub fn chunks(chunks: &[&str]) -> Self {
        Reply::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn hold(chunks: &[&str]) -> Self {
        Reply::ChunksThenHold(chunks.iter().map(|c| c.to_string()).collect())
    }
}

/// 텍스트 델타 레코드
pub fn text(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "type": "text", "content": content })
    )
}

pub const DONE: &str = "data: [DONE]\n\n";

/// 목 엔드포인트 상태
pub struct EndpointState {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<HashMap<String, String>>>,
}

/// 목 엔드포인트 핸들
pub struct MockEndpoint {
    pub addr: String,
    pub state: Arc<EndpointState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockEndpoint {
    /// 응답 목록으로 시작. 목록이 소진되면 `fallback`을 반복한다.
    pub async fn start(replies: Vec<Reply>, fallback: Reply) -> Self {
        let state = Arc::new(EndpointState {
            replies: Mutex::new(replies.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/stream", get(stream_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("포트 바인딩 실패");
        let port = listener.local_addr().unwrap().port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("서버 실행 실패");
        });

        Self {
            addr: format!("http://127.0.0.1:{}", port),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// 스트림 엔드포인트 URL
    pub fn stream_url(&self) -> String {
        format!("{}/stream", self.addr)
    }

    /// 받은 요청 수
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// n번째 요청의 쿼리
    pub fn query(&self, index: usize) -> HashMap<String, String> {
        self.state.requests.lock()[index].clone()
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn stream_handler(
    State(state): State<Arc<EndpointState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.requests.lock().push(query);
    let reply = state
        .replies
        .lock()
        .pop_front()
        .unwrap_or_else(|| state.fallback.clone());

    match reply {
        Reply::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "error").into_response()
        }
        Reply::Chunks(chunks) => event_stream(
            stream::iter(chunks.into_iter().map(Ok::<String, Infallible>)).boxed(),
        ),
        Reply::ChunksThenHold(chunks) => event_stream(
            stream::iter(chunks.into_iter().map(Ok::<String, Infallible>))
                .chain(stream::pending::<Result<String, Infallible>>())
                .boxed(),
        ),
        Reply::ChunksThenClose(chunks, after) => event_stream(
            stream::iter(chunks.into_iter().map(Ok::<String, Infallible>))
                .chain(stream::once(async move {
                    tokio::time::sleep(after).await;
                    Ok(String::new())
                }))
                .boxed(),
        ),
    }
}

fn event_stream(body: BoxStream<'static, Result<String, Infallible>>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// 콜백 기록용 리스너
#[derive(Default)]
pub struct Recorder {
    pub deltas: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<StreamError>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl StreamHandler for Recorder {
    fn on_chunk(&self, delta: &str, _accumulated: &str) {
        self.deltas.lock().push(delta.to_string());
    }

    fn on_complete(&self, final_text: &str) {
        self.completions.lock().push(final_text.to_string());
    }

    fn on_error(&self, error: &StreamError) {
        self.errors.lock().push(error.clone());
    }
}

/// 바인딩 상태가 조건을 만족할 때까지 대기
pub async fn wait_status(
    rx: &mut watch::Receiver<BindingSnapshot>,
    status: BindingStatus,
) -> BindingSnapshot {
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|snapshot| snapshot.status == status),
    )
    .await
    .expect("상태 대기 타임아웃")
    .expect("상태 채널 종료")
    .clone()
}
