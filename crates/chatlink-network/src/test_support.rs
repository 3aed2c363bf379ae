//! 테스트용 목 전송과 기록용 핸들러

use std::sync::Arc;

use chatlink_core::error::{CoreError, StreamError};
use chatlink_core::models::connection::TransportKind;
use chatlink_core::ports::stream::StreamHandler;
use chatlink_core::ports::transport::{
    Transport, TransportEvent, TransportEventSender, TransportFactory,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

/// 테스트 로그 출력 (`RUST_LOG`로 조절, 여러 번 호출해도 안전)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 목 전송 호출 기록 (팩토리가 만든 모든 전송이 공유)
#[derive(Default)]
pub struct TransportLog {
    pub opened: Vec<(Url, TransportEventSender)>,
    pub closes: usize,
    pub fail_next_open: bool,
}

impl TransportLog {
    /// 가장 최근에 열린 연결의 송신기
    pub fn last_sender(&self) -> TransportEventSender {
        self.opened
            .last()
            .map(|(_, sender)| sender.clone())
            .expect("열린 전송 없음")
    }
}

pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl MockTransport {
    pub fn new(log: Arc<Mutex<TransportLog>>) -> Self {
        Self { log }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PushEvent
    }

    fn open(&mut self, url: &Url, events: TransportEventSender) -> Result<(), CoreError> {
        let mut log = self.log.lock();
        if std::mem::take(&mut log.fail_next_open) {
            return Err(CoreError::Network("mock open failure".to_string()));
        }
        log.opened.push((url.clone(), events));
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closes += 1;
    }
}

/// 공유 기록을 쓰는 목 전송 팩토리
pub fn mock_factory() -> (Arc<dyn TransportFactory>, Arc<Mutex<TransportLog>>) {
    let log = Arc::new(Mutex::new(TransportLog::default()));
    let shared = log.clone();
    let factory = move || Box::new(MockTransport::new(shared.clone())) as Box<dyn Transport>;
    (Arc::new(factory), log)
}

/// 가장 최근 연결로 이벤트 전송
pub fn emit(log: &Arc<Mutex<TransportLog>>, event: TransportEvent) {
    log.lock().last_sender().send(event);
}

/// 콜백 기록 핸들러
#[derive(Default)]
pub struct RecordingHandler {
    pub chunks: Mutex<Vec<(String, String)>>,
    pub completions: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<StreamError>>,
    pub notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deltas(&self) -> Vec<String> {
        self.chunks.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn terminal_count(&self) -> usize {
        self.completions.lock().len() + self.errors.lock().len()
    }

    /// 완료 또는 에러 콜백까지 대기
    pub async fn wait_terminal(&self) {
        while self.terminal_count() == 0 {
            self.notify.notified().await;
        }
    }
}

impl StreamHandler for RecordingHandler {
    fn on_chunk(&self, delta: &str, accumulated: &str) {
        self.chunks
            .lock()
            .push((delta.to_string(), accumulated.to_string()));
        self.notify.notify_one();
    }

    fn on_complete(&self, final_text: &str) {
        self.completions.lock().push(final_text.to_string());
        self.notify.notify_one();
    }

    fn on_error(&self, error: &StreamError) {
        self.errors.lock().push(error.clone());
        self.notify.notify_one();
    }
}
