//! 바이트 스트림 스트림 세션.
//!
//! 이벤트 전송 없이 원시 HTTP 응답 본문을 직접 읽는 대안 경로.
//! [`StreamSession`](crate::stream_session::StreamSession)과 같은 계약
//! (`start/stop/reconnect/metrics`, 같은 프레임 의미)을 따르지만 자동 재연결은 없다.
//! 실패는 즉시 분류되어 한 번 보고되고, 복구는 `reconnect()`로 한다.
//!
//! 콜백 전달과 제어 호출은 같은 게이트로 직렬화되고, 수신 태스크는 게이트 안에서 세대 번호를
//! 다시 확인하므로 `stop()`이 반환된 뒤에는 어떤 콜백도 나가지 않는다.

use std::sync::Arc;
use std::time::Duration;

use chatlink_core::error::{ConnectionPhase, StreamError, TimeoutPhase};
use chatlink_core::models::connection::ConnectionState;
use chatlink_core::models::frame::Frame;
use chatlink_core::models::metrics::MetricsSnapshot;
use chatlink_core::models::request::StreamRequest;
use chatlink_core::ports::byte_stream::ByteStreamOpener;
use chatlink_core::ports::stream::{StreamControl, StreamHandler};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::accumulator::{ContentBuffer, MetricsTracker};
use crate::frame_parser::RecordBuffer;
use crate::stream_session::{dispatch, DispatchGate, SessionOutput, SessionSettings};

#[derive(Default)]
struct ChunkedState {
    generation: u64,
    request: Option<StreamRequest>,
    url: Option<Url>,
    content: ContentBuffer,
    metrics: MetricsTracker,
    task: Option<JoinHandle<()>>,
    connection: ConnectionState,
    active: bool,
}

impl ChunkedState {
    fn halt(&mut self, now: Instant) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.active {
            self.metrics.finish(now);
        }
        self.active = false;
        self.connection = ConnectionState::Disconnected;
    }

    fn finish_with(&mut self, output: SessionOutput, now: Instant) -> Vec<SessionOutput> {
        // 수신 태스크 자신이 호출하므로 abort하지 않고 핸들만 놓는다
        self.task = None;
        self.metrics.finish(now);
        self.active = false;
        self.connection = ConnectionState::Disconnected;
        vec![output]
    }

    /// 프레임 적용. 스트림을 계속 읽어야 하면 `true`.
    fn apply_frame(
        &mut self,
        frame: Result<Option<Frame>, StreamError>,
        now: Instant,
    ) -> (Vec<SessionOutput>, bool) {
        match frame {
            Err(error) => (self.finish_with(SessionOutput::Error(error), now), false),
            Ok(None) | Ok(Some(Frame::Ping)) => (Vec::new(), true),
            Ok(Some(Frame::Chunk { content })) => match self.content.append(&content) {
                Some(delta) => {
                    self.metrics.record_token(now);
                    let output = SessionOutput::Chunk {
                        delta,
                        accumulated: self.content.as_str().to_string(),
                    };
                    (vec![output], true)
                }
                None => (Vec::new(), true),
            },
            Ok(Some(Frame::Done)) => {
                let text = self.content.as_str().to_string();
                (self.finish_with(SessionOutput::Complete { text }, now), false)
            }
            Ok(Some(Frame::Error { message })) => {
                let error = StreamError::Protocol { message };
                (self.finish_with(SessionOutput::Error(error), now), false)
            }
        }
    }
}

/// 수신 태스크가 공유하는 문맥
#[derive(Clone)]
struct RunContext {
    state: Arc<Mutex<ChunkedState>>,
    gate: Arc<DispatchGate>,
    handler: Arc<dyn StreamHandler>,
    opener: Arc<dyn ByteStreamOpener>,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl RunContext {
    /// 세대가 유효할 때만 상태를 바꾸고, 잠금을 푼 뒤 게이트 안에서 콜백 호출
    fn with_state<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut ChunkedState) -> (Vec<SessionOutput>, bool),
    {
        let (outputs, keep_going) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!("이전 세대 수신 태스크 — 콜백 생략");
                return false;
            }
            f(&mut state)
        };
        dispatch(
            &self.gate,
            self.handler.as_ref(),
            generation,
            || self.state.lock().generation,
            outputs,
        );
        keep_going
    }

    fn fail(&self, generation: u64, error: StreamError) {
        warn!("바이트 스트림 세션 에러: {}", error);
        self.with_state(generation, |state| {
            (state.finish_with(SessionOutput::Error(error), Instant::now()), false)
        });
    }

    async fn run(self, generation: u64, url: Url, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let proceed = self.with_state(generation, |state| {
            state.connection = ConnectionState::Connecting;
            (Vec::new(), true)
        });
        if !proceed {
            return;
        }

        let mut stream = match timeout(self.connect_timeout, self.opener.open(&url)).await {
            Err(_) => {
                let error = StreamError::Timeout {
                    phase: TimeoutPhase::Connect,
                    after_ms: self.connect_timeout.as_millis() as u64,
                };
                return self.fail(generation, error);
            }
            Ok(Err(e)) => {
                warn!("바이트 스트림 연결 실패: {}", e);
                let error = StreamError::Connection {
                    phase: ConnectionPhase::ConnectingFailed,
                    attempts: 0,
                };
                return self.fail(generation, error);
            }
            Ok(Ok(stream)) => stream,
        };

        let proceed = self.with_state(generation, |state| {
            state.connection = ConnectionState::Connected;
            state.content.begin_replay();
            (Vec::new(), true)
        });
        if !proceed {
            return;
        }
        info!("바이트 스트림 세션 연결됨");

        let mut records = RecordBuffer::new();
        loop {
            let bytes = match timeout(self.idle_timeout, stream.next()).await {
                Err(_) => {
                    let error = StreamError::Timeout {
                        phase: TimeoutPhase::Idle,
                        after_ms: self.idle_timeout.as_millis() as u64,
                    };
                    return self.fail(generation, error);
                }
                Ok(None) => {
                    records.finish();
                    let error = StreamError::Connection {
                        phase: ConnectionPhase::ClosedByServer,
                        attempts: 0,
                    };
                    return self.fail(generation, error);
                }
                Ok(Some(Err(e))) => {
                    warn!("바이트 스트림 읽기 실패: {}", e);
                    let error = StreamError::Connection {
                        phase: ConnectionPhase::InterruptedWhileOpen,
                        attempts: 0,
                    };
                    return self.fail(generation, error);
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for record in records.push(&bytes) {
                let frame = record.into_frame();
                if !self.with_state(generation, |state| state.apply_frame(frame, Instant::now())) {
                    return;
                }
            }
        }
    }
}

/// 바이트 스트림 스트림 세션
///
/// tokio 런타임 안에서 사용해야 한다.
pub struct ChunkedTransportSession {
    settings: SessionSettings,
    context: RunContext,
}

impl ChunkedTransportSession {
    /// 새 세션
    pub fn new(
        settings: SessionSettings,
        opener: Arc<dyn ByteStreamOpener>,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        let context = RunContext {
            state: Arc::new(Mutex::new(ChunkedState::default())),
            gate: Arc::new(DispatchGate::new(())),
            handler,
            opener,
            connect_timeout: settings.optimal.connect_timeout(),
            idle_timeout: settings.optimal.idle_timeout(),
        };
        Self { settings, context }
    }

    /// 연결 상태
    pub fn state(&self) -> ConnectionState {
        self.context.state.lock().connection
    }

    /// 누적 콘텐츠 복사본
    pub fn content(&self) -> String {
        self.context.state.lock().content.as_str().to_string()
    }

    /// 수신 태스크가 살아 있는지
    pub fn is_running(&self) -> bool {
        self.context
            .state
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn spawn_run(&self, generation: u64, url: Url, delay: Duration) {
        let task = tokio::spawn(self.context.clone().run(generation, url, delay));
        let mut state = self.context.state.lock();
        if state.generation == generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }
}

impl StreamControl for ChunkedTransportSession {
    fn start(&self, request: StreamRequest) -> Result<(), StreamError> {
        let url = self.settings.endpoint.build_url(&request)?;
        let now = Instant::now();

        let _gate = self.context.gate.lock();
        let generation = {
            let mut state = self.context.state.lock();
            state.halt(now);
            state.generation += 1;
            state.content.clear();
            state.metrics.reset(now);
            state.request = Some(request);
            state.url = Some(url.clone());
            state.active = true;
            state.generation
        };

        self.context.handler.on_start();
        debug!("바이트 스트림 세션 시작 (세대 {generation})");
        self.spawn_run(generation, url, Duration::ZERO);
        Ok(())
    }

    /// 진행 중인 콜백이 끝날 때까지 기다린 뒤 중지한다
    fn stop(&self) {
        let _gate = self.context.gate.lock();
        let mut state = self.context.state.lock();
        if state.active {
            info!("바이트 스트림 세션 중지");
        }
        state.generation += 1;
        state.halt(Instant::now());
    }

    fn reconnect(&self) -> Result<(), StreamError> {
        let _gate = self.context.gate.lock();
        let (generation, url) = {
            let mut state = self.context.state.lock();
            let Some(url) = state.url.clone().filter(|_| state.request.is_some()) else {
                return Err(StreamError::validation("request", "재실행할 요청이 없음"));
            };
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.generation += 1;
            state.metrics.record_reconnection();
            state.metrics.resume();
            state.active = true;
            state.connection = ConnectionState::Reconnecting;
            (state.generation, url)
        };

        let cooldown = self.settings.reconnect.cooldown();
        info!("바이트 스트림 재연결 — {}ms 후", cooldown.as_millis());
        self.spawn_run(generation, url, cooldown);
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.context.state.lock().metrics.snapshot(Instant::now())
    }
}

impl Drop for ChunkedTransportSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingHandler;
    use async_trait::async_trait;
    use chatlink_core::config::AppConfig;
    use chatlink_core::error::CoreError;
    use chatlink_core::ports::byte_stream::ByteChunkStream;
    use std::collections::VecDeque;

    const STREAM: &[u8] = b"data: {\"type\":\"text\",\"content\":\"ab\"}\n\ndata: {\"type\":\"text\",\"content\":\"cd\"}\n\ndata: [DONE]\n\n";

    /// 호출마다 준비된 스크립트 하나를 재생하는 연결자
    enum Script {
        Chunks(Vec<Vec<u8>>),
        ChunksThenStall(Vec<Vec<u8>>),
        NeverConnects,
        Refused,
    }

    struct ScriptedOpener {
        scripts: Mutex<VecDeque<Script>>,
        calls: Mutex<usize>,
    }

    impl ScriptedOpener {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl ByteStreamOpener for ScriptedOpener {
        async fn open(&self, _url: &Url) -> Result<ByteChunkStream, CoreError> {
            *self.calls.lock() += 1;
            let script = self.scripts.lock().pop_front();
            let ok = |chunks: Vec<Vec<u8>>| -> Vec<Result<Vec<u8>, CoreError>> {
                chunks.into_iter().map(Ok).collect()
            };
            match script {
                Some(Script::Chunks(chunks)) => Ok(futures::stream::iter(ok(chunks)).boxed()),
                Some(Script::ChunksThenStall(chunks)) => Ok(futures::stream::iter(ok(chunks))
                    .chain(futures::stream::pending())
                    .boxed()),
                Some(Script::NeverConnects) => std::future::pending().await,
                Some(Script::Refused) | None => {
                    Err(CoreError::Network("connection refused".to_string()))
                }
            }
        }
    }

    fn settings() -> SessionSettings {
        let mut config = AppConfig::default_config();
        config.endpoint.tenant_hash = Some("th_test".to_string());
        SessionSettings::from_config(&config)
    }

    fn session(scripts: Vec<Script>) -> (ChunkedTransportSession, Arc<RecordingHandler>, Arc<ScriptedOpener>) {
        let handler = RecordingHandler::new();
        let opener = ScriptedOpener::new(scripts);
        let session = ChunkedTransportSession::new(settings(), opener.clone(), handler.clone());
        (session, handler, opener)
    }

    fn request() -> StreamRequest {
        StreamRequest::new("hello", "sess_1")
    }

    #[tokio::test]
    async fn split_stream_assembles_frames() {
        for split in [1, 7, 20, 38, 39, 40, 60, STREAM.len() - 1] {
            let chunks = vec![STREAM[..split].to_vec(), STREAM[split..].to_vec()];
            let (session, handler, _) = session(vec![Script::Chunks(chunks)]);

            session.start(request()).unwrap();
            tokio::time::timeout(Duration::from_secs(1), handler.wait_terminal())
                .await
                .unwrap();

            assert_eq!(handler.deltas(), vec!["ab", "cd"], "split at {split}");
            assert_eq!(*handler.completions.lock(), vec!["abcd".to_string()]);
            assert_eq!(handler.error_count(), 0);
            assert_eq!(session.state(), ConnectionState::Disconnected);
        }
    }

    #[tokio::test]
    async fn end_without_done_is_closed_by_server() {
        let (session, handler, _) = session(vec![Script::Chunks(vec![
            b"data: {\"type\":\"text\",\"content\":\"ab\"}\n\ndata: {\"ty".to_vec(),
        ])]);

        session.start(request()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handler.wait_terminal())
            .await
            .unwrap();

        assert_eq!(handler.deltas(), vec!["ab"]);
        assert_eq!(
            *handler.errors.lock(),
            vec![StreamError::Connection {
                phase: ConnectionPhase::ClosedByServer,
                attempts: 0
            }]
        );
    }

    #[tokio::test]
    async fn refused_connection_is_connecting_failed() {
        let (session, handler, _) = session(vec![Script::Refused]);
        session.start(request()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handler.wait_terminal())
            .await
            .unwrap();
        assert!(matches!(
            handler.errors.lock()[0],
            StreamError::Connection {
                phase: ConnectionPhase::ConnectingFailed,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_reports_once() {
        let (session, handler, _) = session(vec![Script::NeverConnects]);
        session.start(request()).unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(handler.error_count(), 1);
        assert_eq!(
            handler.errors.lock()[0],
            StreamError::Timeout {
                phase: TimeoutPhase::Connect,
                after_ms: 30_000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_after_stall() {
        let (session, handler, _) = session(vec![Script::ChunksThenStall(vec![
            b"data: x\n\n".to_vec(),
        ])]);
        session.start(request()).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(handler.deltas(), vec!["x"]);
        assert_eq!(
            *handler.errors.lock(),
            vec![StreamError::Timeout {
                phase: TimeoutPhase::Idle,
                after_ms: 60_000
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_stream() {
        let (session, handler, _) = session(vec![Script::ChunksThenStall(vec![
            b"data: x\n\n".to_vec(),
        ])]);
        session.start(request()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.stop();
        session.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(handler.deltas(), vec!["x"]);
        assert_eq!(handler.terminal_count(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_running());
        assert!(session.metrics().total_time_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_without_duplicates() {
        let (session, handler, opener) = session(vec![
            Script::ChunksThenStall(vec![b"data: {\"type\":\"text\",\"content\":\"ab\"}\n\n".to_vec()]),
            Script::Chunks(vec![STREAM.to_vec()]),
        ]);
        session.start(request()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.deltas(), vec!["ab"]);

        session.reconnect().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handler.wait_terminal())
            .await
            .unwrap();

        assert_eq!(*opener.calls.lock(), 2);
        assert_eq!(handler.deltas(), vec!["ab", "cd"]);
        assert_eq!(*handler.completions.lock(), vec!["abcd".to_string()]);
        assert_eq!(session.metrics().reconnection_attempts, 1);
    }

    #[tokio::test]
    async fn reconnect_without_request_fails() {
        let (session, _, _) = session(vec![]);
        assert!(session.reconnect().is_err());
    }

    #[tokio::test]
    async fn validation_error_spawns_nothing() {
        let (session, handler, opener) = session(vec![]);
        let result = session.start(StreamRequest::new("hello", ""));
        assert!(matches!(result, Err(StreamError::Validation { .. })));
        assert_eq!(*opener.calls.lock(), 0);
        assert_eq!(handler.terminal_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_in_flight_callback() {
        struct SlowChunk {
            entered: tokio::sync::Notify,
            order: Arc<Mutex<Vec<&'static str>>>,
            inner: Arc<RecordingHandler>,
        }
        impl StreamHandler for SlowChunk {
            fn on_chunk(&self, delta: &str, accumulated: &str) {
                self.entered.notify_one();
                std::thread::sleep(Duration::from_millis(100));
                self.inner.on_chunk(delta, accumulated);
                self.order.lock().push("callback");
            }
            fn on_complete(&self, text: &str) {
                self.inner.on_complete(text);
            }
            fn on_error(&self, error: &StreamError) {
                self.inner.on_error(error);
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let inner = RecordingHandler::new();
        let handler = Arc::new(SlowChunk {
            entered: tokio::sync::Notify::new(),
            order: order.clone(),
            inner: inner.clone(),
        });
        let opener = ScriptedOpener::new(vec![Script::Chunks(vec![STREAM.to_vec()])]);
        let session = Arc::new(ChunkedTransportSession::new(
            settings(),
            opener,
            handler.clone(),
        ));

        session.start(request()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handler.entered.notified())
            .await
            .unwrap();

        let stopper = {
            let session = session.clone();
            let order = order.clone();
            tokio::task::spawn_blocking(move || {
                session.stop();
                order.lock().push("stopped");
            })
        };
        stopper.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 같은 버퍼에 있던 "cd"와 완료는 중지 후 나가지 않는다
        assert_eq!(*order.lock(), vec!["callback", "stopped"]);
        assert_eq!(inner.deltas(), vec!["ab"]);
        assert_eq!(inner.terminal_count(), 0);
    }
}
