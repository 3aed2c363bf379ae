//! 호스트(UI) 바인딩.
//!
//! 세션을 UI 레이어에 관찰 가능한 상태(`watch`) + 콜백으로 노출하는 얇은 래퍼.
//! 전송 방식 선택은 설정(`endpoint.transport`)에 따른다.

use std::sync::Arc;

use chatlink_core::config::AppConfig;
use chatlink_core::error::{CoreError, StreamError};
use chatlink_core::models::connection::TransportKind;
use chatlink_core::models::metrics::MetricsSnapshot;
use chatlink_core::models::request::StreamRequest;
use chatlink_core::ports::activity::ActivitySource;
use chatlink_core::ports::stream::{StreamControl, StreamHandler};
use chatlink_core::ports::transport::{Transport, TransportFactory};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::chunked_session::ChunkedTransportSession;
use crate::chunked_transport::{ChunkedTransport, HttpByteStream};
use crate::sse_transport::SseTransport;
use crate::stream_session::{SessionSettings, StreamSession};

/// UI에 노출되는 진행 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    /// 요청 없음
    #[default]
    Idle,
    /// 연결 중 (첫 델타 전)
    Connecting,
    /// 델타 수신 중
    Streaming,
    /// 완료
    Completed,
    /// 에러로 종료
    Failed,
    /// 사용자가 중지
    Stopped,
}

impl BindingStatus {
    /// 요청이 진행 중인지
    pub fn is_busy(&self) -> bool {
        matches!(self, BindingStatus::Connecting | BindingStatus::Streaming)
    }
}

/// 관찰 가능한 바인딩 상태
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BindingSnapshot {
    /// 진행 상태
    pub status: BindingStatus,
    /// 누적 콘텐츠
    pub content: String,
    /// 마지막 에러
    pub error: Option<StreamError>,
}

/// 상태 갱신 + 사용자 콜백 전달
struct BindingHandler {
    state_tx: Arc<watch::Sender<BindingSnapshot>>,
    listener: Option<Arc<dyn StreamHandler>>,
}

impl StreamHandler for BindingHandler {
    fn on_start(&self) {
        self.state_tx.send_replace(BindingSnapshot {
            status: BindingStatus::Connecting,
            ..BindingSnapshot::default()
        });
        if let Some(listener) = &self.listener {
            listener.on_start();
        }
    }

    fn on_chunk(&self, delta: &str, accumulated: &str) {
        self.state_tx.send_modify(|state| {
            state.status = BindingStatus::Streaming;
            state.content = accumulated.to_string();
            state.error = None;
        });
        if let Some(listener) = &self.listener {
            listener.on_chunk(delta, accumulated);
        }
    }

    fn on_complete(&self, final_text: &str) {
        self.state_tx.send_modify(|state| {
            state.status = BindingStatus::Completed;
            state.content = final_text.to_string();
        });
        if let Some(listener) = &self.listener {
            listener.on_complete(final_text);
        }
    }

    fn on_error(&self, error: &StreamError) {
        self.state_tx.send_modify(|state| {
            state.status = BindingStatus::Failed;
            state.error = Some(error.clone());
        });
        if let Some(listener) = &self.listener {
            listener.on_error(error);
        }
    }
}

/// 전송 방식별 전송 팩토리
///
/// 팩토리는 HTTP 클라이언트 하나를 공유하고 세션마다 새 전송을 만든다.
pub fn transport_factory(kind: TransportKind) -> Result<Arc<dyn TransportFactory>, CoreError> {
    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;

    let factory: Arc<dyn TransportFactory> = match kind {
        TransportKind::PushEvent => Arc::new(move || {
            Box::new(SseTransport::with_client(http_client.clone())) as Box<dyn Transport>
        }),
        TransportKind::ChunkedStream => {
            let opener = Arc::new(HttpByteStream::with_client(http_client));
            Arc::new(move || Box::new(ChunkedTransport::new(opener.clone())) as Box<dyn Transport>)
        }
    };
    Ok(factory)
}

/// 호스트 바인딩
pub struct HostBinding {
    control: Arc<dyn StreamControl>,
    state_tx: Arc<watch::Sender<BindingSnapshot>>,
}

impl HostBinding {
    /// 세션 생성 함수로 바인딩 구성
    ///
    /// `build`는 바인딩 내부 핸들러를 받아 세션을 만든다. `listener`가 있으면
    /// 상태 갱신 뒤 같은 콜백을 받는다.
    pub fn new<F>(build: F, listener: Option<Arc<dyn StreamHandler>>) -> Self
    where
        F: FnOnce(Arc<dyn StreamHandler>) -> Arc<dyn StreamControl>,
    {
        let (state_tx, _) = watch::channel(BindingSnapshot::default());
        let state_tx = Arc::new(state_tx);
        let handler = Arc::new(BindingHandler {
            state_tx: state_tx.clone(),
            listener,
        });
        Self {
            control: build(handler),
            state_tx,
        }
    }

    /// 설정에 따라 이벤트 전송 또는 바이트 스트림 세션으로 구성
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn from_config(
        config: &AppConfig,
        activity: Option<&dyn ActivitySource>,
        listener: Option<Arc<dyn StreamHandler>>,
    ) -> Result<Self, CoreError> {
        let settings = SessionSettings::from_config(config);
        let kind = config.endpoint.transport;
        info!("호스트 바인딩 구성: 전송 {}", kind);

        let binding = match kind {
            TransportKind::PushEvent => {
                let factory = transport_factory(kind)?;
                Self::new(
                    |handler| -> Arc<dyn StreamControl> {
                        match activity {
                            Some(source) => Arc::new(StreamSession::with_activity(
                                settings, factory, handler, source,
                            )),
                            None => Arc::new(StreamSession::new(settings, factory, handler)),
                        }
                    },
                    listener,
                )
            }
            TransportKind::ChunkedStream => {
                let opener = Arc::new(HttpByteStream::new()?);
                Self::new(
                    |handler| -> Arc<dyn StreamControl> {
                        Arc::new(ChunkedTransportSession::new(settings, opener, handler))
                    },
                    listener,
                )
            }
        };
        Ok(binding)
    }

    /// 요청 시작
    ///
    /// 상태는 세션이 요청을 수락할 때(`on_start`) 초기화된다. 검증에 실패하면
    /// 진행 중인 스트림의 상태는 그대로 두고, 진행 중이 아니면 FAILED로 기록한다.
    pub fn start(&self, request: StreamRequest) -> Result<(), StreamError> {
        if let Err(error) = self.control.start(request) {
            warn!("요청 거부: {}", error);
            self.state_tx.send_if_modified(|state| {
                if state.status.is_busy() {
                    return false;
                }
                state.status = BindingStatus::Failed;
                state.error = Some(error.clone());
                true
            });
            return Err(error);
        }
        Ok(())
    }

    /// 중지
    pub fn stop(&self) {
        self.control.stop();
        self.state_tx.send_if_modified(|state| {
            if !state.status.is_busy() {
                return false;
            }
            state.status = BindingStatus::Stopped;
            true
        });
    }

    /// 마지막 요청 재실행 (누적 콘텐츠 유지)
    pub fn reconnect(&self) -> Result<(), StreamError> {
        self.control.reconnect()?;
        self.state_tx.send_modify(|state| {
            state.status = BindingStatus::Connecting;
            state.error = None;
        });
        Ok(())
    }

    /// 메트릭 스냅샷
    pub fn metrics(&self) -> MetricsSnapshot {
        self.control.metrics()
    }

    /// 상태 변경 수신기
    pub fn subscribe(&self) -> watch::Receiver<BindingSnapshot> {
        self.state_tx.subscribe()
    }

    /// 현재 상태 복사본
    pub fn snapshot(&self) -> BindingSnapshot {
        self.state_tx.borrow().clone()
    }
}
