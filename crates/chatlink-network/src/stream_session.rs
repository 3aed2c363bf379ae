//! 이벤트 전송 스트림 세션.
//!
//! 요청 하나의 수명 주기를 관리한다: URL 생성, 연결 상태 머신 생성/정리,
//! 프레임 파싱, 콘텐츠 누적, 연결/유휴 타임아웃, 메트릭, 콜백 디스패치.
//!
//! 구조:
//! - [`SessionCore`]: 동기 상태 (`now`를 인자로 받음, 테스트에서 직접 구동)
//! - [`StreamSession`]: 코어를 잠금으로 감싸고 구동 태스크 하나가 전송 이벤트,
//!   타이머 데드라인, 가시성 신호를 순서대로 코어에 전달한다
//!
//! 세대(generation) 번호가 바뀐 뒤 도착한 이전 연결의 이벤트는 모두 버린다.
//! 콜백 전달과 제어 호출(`start/stop/reconnect`)은 [`DispatchGate`] 아래에서 직렬화되고,
//! 전달 직전에 에포크를 다시 확인하므로 `stop()`이 반환된 뒤에는 이전 요청의 콜백이 나가지 않는다.

use std::sync::Arc;

use chatlink_core::config::{AppConfig, ReconnectConfig};
use chatlink_core::error::{StreamError, TimeoutPhase};
use chatlink_core::models::activity::Visibility;
use chatlink_core::models::connection::{ConnectionInfo, ConnectionState};
use chatlink_core::models::frame::Frame;
use chatlink_core::models::metrics::MetricsSnapshot;
use chatlink_core::models::request::StreamRequest;
use chatlink_core::ports::activity::ActivitySource;
use chatlink_core::ports::stream::{StreamControl, StreamHandler};
use chatlink_core::ports::transport::{TransportEnvelope, TransportFactory};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::accumulator::{ContentBuffer, MetricsTracker};
use crate::capability::{BrowserClassification, OptimalConfig};
use crate::connection_manager::{ConnectionManager, ManagerConfig, ManagerEvent};
use crate::endpoint::StreamEndpoint;
use crate::frame_parser::{parse_payload, RecordBuffer};
use crate::timers::TimerSet;

// ============================================================
// 설정
// ============================================================

/// 세션 설정 (엔드포인트 + 브라우저 권장 타임아웃 + 재연결 정책)
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// 엔드포인트
    pub endpoint: StreamEndpoint,
    /// 타임아웃/keep-alive 설정
    pub optimal: OptimalConfig,
    /// 재연결 정책
    pub reconnect: ReconnectConfig,
}

impl SessionSettings {
    /// 앱 설정에서 생성 — User-Agent 분류 후 설정 파일 재정의 적용
    pub fn from_config(config: &AppConfig) -> Self {
        let user_agent = config.endpoint.user_agent.as_deref().unwrap_or_default();
        let classification = BrowserClassification::from_user_agent(user_agent);
        let optimal = classification
            .optimal_config()
            .with_overrides(&config.timeouts);
        let endpoint =
            StreamEndpoint::new(&config.endpoint.url, config.endpoint.tenant_hash.clone())
                .with_classification(classification);

        debug!(
            "세션 설정: target={}, mobile={}, {:?}",
            classification.is_target_browser, classification.is_mobile_variant, optimal
        );

        Self {
            endpoint,
            optimal,
            reconnect: config.reconnect.clone(),
        }
    }
}

// ============================================================
// 동기 코어
// ============================================================

/// 코어가 내보내는 콜백 요청
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// `on_chunk(delta, accumulated)`
    Chunk { delta: String, accumulated: String },
    /// `on_complete(final_text)`
    Complete { text: String },
    /// `on_error(error)`
    Error(StreamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum SessionTimer {
    ConnectTimeout,
    IdleTimeout,
    Cooldown,
}

/// 스트림 세션 동기 상태
pub struct SessionCore {
    settings: SessionSettings,
    factory: Arc<dyn TransportFactory>,
    events_tx: mpsc::UnboundedSender<TransportEnvelope>,
    generation: u64,
    epoch: u64,
    manager: Option<ConnectionManager>,
    request: Option<StreamRequest>,
    url: Option<Url>,
    content: ContentBuffer,
    records: RecordBuffer,
    metrics: MetricsTracker,
    timers: TimerSet<SessionTimer>,
    active: bool,
    is_background: bool,
    manual_reconnects: u32,
}

impl SessionCore {
    /// 새 코어. 전송 이벤트는 `events_tx`로 들어와 [`SessionCore::handle_transport`]로 전달되어야 한다.
    pub fn new(
        settings: SessionSettings,
        factory: Arc<dyn TransportFactory>,
        events_tx: mpsc::UnboundedSender<TransportEnvelope>,
    ) -> Self {
        Self {
            settings,
            factory,
            events_tx,
            generation: 0,
            epoch: 0,
            manager: None,
            request: None,
            url: None,
            content: ContentBuffer::new(),
            records: RecordBuffer::new(),
            metrics: MetricsTracker::default(),
            timers: TimerSet::new(),
            active: false,
            is_background: false,
            manual_reconnects: 0,
        }
    }

    /// 새 요청 시작
    ///
    /// 검증 실패 시 기존 세션은 그대로 두고 에러를 반환한다 (콜백 없음).
    pub fn start(
        &mut self,
        request: StreamRequest,
        now: Instant,
    ) -> Result<Vec<SessionOutput>, StreamError> {
        let url = self.settings.endpoint.build_url(&request)?;

        self.teardown(now);
        self.epoch += 1;
        self.content.clear();
        self.metrics.reset(now);
        self.request = Some(request);
        self.url = Some(url.clone());
        self.active = true;
        self.manual_reconnects = 0;

        let mut outputs = Vec::new();
        self.connect_fresh(url, now, &mut outputs);
        Ok(outputs)
    }

    /// 중지. 여러 번 호출해도 안전하다.
    pub fn stop(&mut self, now: Instant) {
        if self.active {
            info!("스트림 중지");
        }
        self.epoch += 1;
        self.teardown(now);
    }

    /// 마지막 요청을 쿨다운 후 새 연결로 재실행
    ///
    /// 누적 콘텐츠는 유지되고, 재전송된 앞부분은 건너뛴다.
    pub fn reconnect(&mut self, now: Instant) -> Result<(), StreamError> {
        if self.request.is_none() || self.url.is_none() {
            return Err(StreamError::validation("request", "재실행할 요청이 없음"));
        }

        self.manual_reconnects += 1;
        self.metrics.record_reconnection();
        self.metrics.resume();
        if let Some(mut manager) = self.manager.take() {
            manager.disconnect();
        }
        // 이전 연결에서 늦게 도착하는 이벤트 차단
        self.generation += 1;
        self.epoch += 1;
        self.timers.clear();
        self.records = RecordBuffer::new();
        self.active = true;

        let cooldown = self.settings.reconnect.cooldown();
        self.timers.arm(SessionTimer::Cooldown, now + cooldown);
        info!(
            "재연결 요청 #{} — {}ms 후 연결",
            self.manual_reconnects,
            cooldown.as_millis()
        );
        Ok(())
    }

    /// 전송 이벤트 처리
    pub fn handle_transport(
        &mut self,
        envelope: TransportEnvelope,
        now: Instant,
    ) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();

        if !self.active || envelope.tag.generation != self.generation {
            debug!("비활성/이전 세대 이벤트 무시: {:?}", envelope.tag);
            return outputs;
        }
        let events = match self.manager.as_mut() {
            Some(manager) => manager.handle_transport(envelope, now),
            None => return outputs,
        };
        self.apply(events, now, &mut outputs);
        outputs
    }

    /// 만료된 타이머 처리 (세션 타이머 → 상태 머신 타이머 순)
    pub fn poll_timers(&mut self, now: Instant) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();

        for timer in self.timers.take_expired(now) {
            if !self.active {
                break;
            }
            match timer {
                SessionTimer::ConnectTimeout => {
                    let error = StreamError::Timeout {
                        phase: TimeoutPhase::Connect,
                        after_ms: self.settings.optimal.connect_timeout_ms,
                    };
                    self.fail(error, now, &mut outputs);
                }
                SessionTimer::IdleTimeout => {
                    let error = StreamError::Timeout {
                        phase: TimeoutPhase::Idle,
                        after_ms: self.settings.optimal.idle_timeout_ms,
                    };
                    self.fail(error, now, &mut outputs);
                }
                SessionTimer::Cooldown => {
                    if let Some(url) = self.url.clone() {
                        self.connect_fresh(url, now, &mut outputs);
                    }
                }
            }
        }

        if self.active {
            let events = match self.manager.as_mut() {
                Some(manager) => manager.poll_timers(now),
                None => Vec::new(),
            };
            self.apply(events, now, &mut outputs);
        }
        outputs
    }

    /// 가시성 변경 처리
    ///
    /// 백그라운드 동안 연결/유휴 타임아웃은 정지되고, 복귀 시 현재 상태에 맞게 다시 설정된다.
    pub fn set_visibility(&mut self, visibility: Visibility, now: Instant) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        let background = visibility.is_background();
        if background == self.is_background {
            return outputs;
        }
        self.is_background = background;
        if !self.settings.optimal.background_handling_enabled {
            return outputs;
        }

        if background {
            self.timers.cancel(SessionTimer::ConnectTimeout);
            self.timers.cancel(SessionTimer::IdleTimeout);
        } else if self.active {
            match self.state() {
                ConnectionState::Connecting => self.arm_connect_timeout(now),
                ConnectionState::Connected => self.touch_idle(now),
                _ => {}
            }
        }

        let events = match self.manager.as_mut() {
            Some(manager) => manager.set_background(background, now),
            None => Vec::new(),
        };
        self.apply(events, now, &mut outputs);
        outputs
    }

    /// 연결 상태 (연결이 없으면 DISCONNECTED)
    pub fn state(&self) -> ConnectionState {
        self.manager
            .as_ref()
            .map(ConnectionManager::state)
            .unwrap_or_default()
    }

    /// 연결 정보
    pub fn connection_info(&self, now: Instant) -> Option<ConnectionInfo> {
        self.manager.as_ref().map(|manager| manager.info(now))
    }

    /// 제어 호출(`start/stop/reconnect`)마다 바뀌는 번호. 출력은 만들어진 에포크에서만 전달된다.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 요청 진행 중인지 (완료/에러/중지 전)
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 누적 콘텐츠
    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    /// 메트릭 스냅샷
    pub fn metrics(&self, now: Instant) -> MetricsSnapshot {
        self.metrics.snapshot(now)
    }

    /// 현재 요청에서 `reconnect()`가 실행된 횟수
    pub fn reconnect_count(&self) -> u32 {
        self.manual_reconnects
    }

    /// 대기 중인 타이머 수 (세션 + 상태 머신)
    pub fn pending_timers(&self) -> usize {
        self.timers.pending() + self.manager.as_ref().map_or(0, ConnectionManager::pending_timers)
    }

    /// 가장 이른 데드라인
    pub fn next_deadline(&self) -> Option<Instant> {
        let manager = self
            .manager
            .as_ref()
            .and_then(ConnectionManager::next_deadline);
        match (self.timers.next_deadline(), manager) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn connect_fresh(&mut self, url: Url, now: Instant, outputs: &mut Vec<SessionOutput>) {
        self.generation += 1;
        let config = ManagerConfig::new(&self.settings.reconnect, &self.settings.optimal);
        let mut manager = ConnectionManager::new(
            config,
            self.factory.create(),
            self.events_tx.clone(),
            self.generation,
        );

        let mut events = Vec::new();
        if self.is_background {
            events.extend(manager.set_background(true, now));
        }
        match manager.connect(url, now) {
            Ok(connect_events) => events.extend(connect_events),
            Err(e) => warn!("연결 시작 실패: {}", e),
        }
        self.manager = Some(manager);
        self.apply(events, now, outputs);
    }

    fn apply(&mut self, events: Vec<ManagerEvent>, now: Instant, outputs: &mut Vec<SessionOutput>) {
        for event in events {
            if !self.active {
                break;
            }
            match event {
                ManagerEvent::Connecting { attempt } => {
                    debug!("연결 중 (시도 {attempt})");
                    self.timers.cancel(SessionTimer::IdleTimeout);
                    self.arm_connect_timeout(now);
                }
                ManagerEvent::Open => {
                    self.timers.cancel(SessionTimer::ConnectTimeout);
                    self.records = RecordBuffer::new();
                    self.content.begin_replay();
                    self.touch_idle(now);
                }
                ManagerEvent::Message(data) => {
                    self.touch_idle(now);
                    let frame = parse_payload(&data);
                    self.handle_frame(frame, now, outputs);
                }
                ManagerEvent::Bytes(bytes) => {
                    self.touch_idle(now);
                    for record in self.records.push(&bytes) {
                        if !self.active {
                            break;
                        }
                        self.handle_frame(record.into_frame(), now, outputs);
                    }
                }
                ManagerEvent::KeepAlive => self.touch_idle(now),
                ManagerEvent::Error { suppressed, .. } | ManagerEvent::Close { suppressed, .. } => {
                    self.timers.cancel(SessionTimer::ConnectTimeout);
                    self.timers.cancel(SessionTimer::IdleTimeout);
                    self.records.finish();
                    if suppressed {
                        self.metrics.record_background_disconnection();
                    }
                }
                ManagerEvent::Reconnecting { attempt, delay } => {
                    self.metrics.record_reconnection();
                    debug!("자동 재연결 {attempt} — {}ms", delay.as_millis());
                }
                ManagerEvent::Failed { failure, attempts } => {
                    let error = StreamError::Connection {
                        phase: failure.phase,
                        attempts,
                    };
                    self.fail(error, now, outputs);
                }
                ManagerEvent::BackgroundEntered | ManagerEvent::BackgroundExited { .. } => {}
                ManagerEvent::ReconnectNeeded => {
                    if let Err(e) = self.reconnect(now) {
                        warn!("복귀 재연결 실패: {}", e);
                    }
                    break;
                }
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Result<Option<Frame>, StreamError>,
        now: Instant,
        outputs: &mut Vec<SessionOutput>,
    ) {
        match frame {
            Err(error) => self.fail(error, now, outputs),
            Ok(None) | Ok(Some(Frame::Ping)) => {}
            Ok(Some(Frame::Chunk { content })) => {
                if let Some(delta) = self.content.append(&content) {
                    self.metrics.record_token(now);
                    outputs.push(SessionOutput::Chunk {
                        delta,
                        accumulated: self.content.as_str().to_string(),
                    });
                }
            }
            Ok(Some(Frame::Done)) => self.complete(now, outputs),
            Ok(Some(Frame::Error { message })) => {
                self.fail(StreamError::Protocol { message }, now, outputs)
            }
        }
    }

    fn complete(&mut self, now: Instant, outputs: &mut Vec<SessionOutput>) {
        self.teardown(now);
        let snapshot = self.metrics.snapshot(now);
        info!(
            "스트림 완료: {}바이트, 토큰 {}, {:.1} tok/s",
            self.content.len(),
            snapshot.token_count,
            snapshot.tokens_per_second
        );
        outputs.push(SessionOutput::Complete {
            text: self.content.as_str().to_string(),
        });
    }

    fn fail(&mut self, error: StreamError, now: Instant, outputs: &mut Vec<SessionOutput>) {
        self.teardown(now);
        warn!("스트림 에러: {}", error);
        outputs.push(SessionOutput::Error(error));
    }

    fn teardown(&mut self, now: Instant) {
        if let Some(mut manager) = self.manager.take() {
            manager.disconnect();
        }
        self.timers.clear();
        self.records = RecordBuffer::new();
        if self.active {
            self.metrics.finish(now);
        }
        self.active = false;
    }

    fn suspended(&self) -> bool {
        self.is_background && self.settings.optimal.background_handling_enabled
    }

    fn arm_connect_timeout(&mut self, now: Instant) {
        if !self.suspended() {
            let deadline = now + self.settings.optimal.connect_timeout();
            self.timers.arm(SessionTimer::ConnectTimeout, deadline);
        }
    }

    fn touch_idle(&mut self, now: Instant) {
        if !self.suspended() {
            let deadline = now + self.settings.optimal.idle_timeout();
            self.timers.arm(SessionTimer::IdleTimeout, deadline);
        }
    }
}

// ============================================================
// 비동기 래퍼
// ============================================================

/// 이벤트 전송 스트림 세션
///
/// tokio 런타임 안에서 생성해야 한다. 드롭하면 구동 태스크와 연결이 정리된다.
pub struct StreamSession {
    core: Arc<Mutex<SessionCore>>,
    gate: Arc<DispatchGate>,
    handler: Arc<dyn StreamHandler>,
    wake: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl StreamSession {
    /// 가시성 신호 없이 생성 (항상 포그라운드)
    pub fn new(
        settings: SessionSettings,
        factory: Arc<dyn TransportFactory>,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        Self::spawn(settings, factory, handler, None)
    }

    /// 가시성 신호 소스와 함께 생성
    pub fn with_activity(
        settings: SessionSettings,
        factory: Arc<dyn TransportFactory>,
        handler: Arc<dyn StreamHandler>,
        activity: &dyn ActivitySource,
    ) -> Self {
        Self::spawn(settings, factory, handler, Some(activity.subscribe()))
    }

    fn spawn(
        settings: SessionSettings,
        factory: Arc<dyn TransportFactory>,
        handler: Arc<dyn StreamHandler>,
        mut activity: Option<watch::Receiver<Visibility>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut core = SessionCore::new(settings, factory, tx);
        if let Some(rx) = activity.as_mut() {
            let initial = *rx.borrow_and_update();
            core.set_visibility(initial, Instant::now());
        }

        let core = Arc::new(Mutex::new(core));
        let gate = Arc::new(DispatchGate::new(()));
        let wake = Arc::new(Notify::new());
        let driver = tokio::spawn(drive(
            core.clone(),
            gate.clone(),
            handler.clone(),
            wake.clone(),
            rx,
            activity,
        ));

        Self {
            core,
            gate,
            handler,
            wake,
            driver,
        }
    }

    /// 연결 상태
    pub fn state(&self) -> ConnectionState {
        self.core.lock().state()
    }

    /// 연결 정보
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.core.lock().connection_info(Instant::now())
    }

    /// 누적 콘텐츠 복사본
    pub fn content(&self) -> String {
        self.core.lock().content().to_string()
    }

    /// 현재 요청에서 `reconnect()`가 실행된 횟수
    pub fn reconnect_count(&self) -> u32 {
        self.core.lock().reconnect_count()
    }

    /// 대기 중인 타이머 수
    pub fn pending_timers(&self) -> usize {
        self.core.lock().pending_timers()
    }
}

impl StreamControl for StreamSession {
    fn start(&self, request: StreamRequest) -> Result<(), StreamError> {
        let _gate = self.gate.lock();
        let (outputs, epoch) = {
            let mut core = self.core.lock();
            let outputs = core.start(request, Instant::now())?;
            (outputs, core.epoch())
        };
        self.handler.on_start();
        self.wake.notify_one();
        dispatch(&self.gate, self.handler.as_ref(), epoch, || self.core.lock().epoch(), outputs);
        Ok(())
    }

    /// 진행 중인 콜백이 끝날 때까지 기다린 뒤 중지한다
    fn stop(&self) {
        let _gate = self.gate.lock();
        self.core.lock().stop(Instant::now());
        self.wake.notify_one();
    }

    fn reconnect(&self) -> Result<(), StreamError> {
        let _gate = self.gate.lock();
        self.core.lock().reconnect(Instant::now())?;
        self.wake.notify_one();
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.core.lock().metrics(Instant::now())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.driver.abort();
        let _gate = self.gate.lock();
        self.core.lock().stop(Instant::now());
    }
}

enum Step {
    Transport(Option<TransportEnvelope>),
    Timers,
    Visibility(Option<Visibility>),
    Wake,
}

async fn drive(
    core: Arc<Mutex<SessionCore>>,
    gate: Arc<DispatchGate>,
    handler: Arc<dyn StreamHandler>,
    wake: Arc<Notify>,
    mut rx: mpsc::UnboundedReceiver<TransportEnvelope>,
    mut activity: Option<watch::Receiver<Visibility>>,
) {
    loop {
        let deadline = core.lock().next_deadline();

        let step = tokio::select! {
            envelope = rx.recv() => Step::Transport(envelope),
            _ = sleep_until(deadline) => Step::Timers,
            visibility = visibility_changed(&mut activity) => Step::Visibility(visibility),
            _ = wake.notified() => Step::Wake,
        };

        // 콜백은 코어 잠금을 푼 뒤 호출
        let (outputs, epoch) = {
            let mut core = core.lock();
            let now = Instant::now();
            let outputs = match step {
                Step::Transport(Some(envelope)) => core.handle_transport(envelope, now),
                Step::Transport(None) => break,
                Step::Timers => core.poll_timers(now),
                Step::Visibility(Some(visibility)) => core.set_visibility(visibility, now),
                Step::Visibility(None) => {
                    debug!("가시성 신호 소스 종료");
                    activity = None;
                    continue;
                }
                Step::Wake => continue,
            };
            (outputs, core.epoch())
        };
        dispatch(&gate, handler.as_ref(), epoch, || core.lock().epoch(), outputs);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn visibility_changed(
    activity: &mut Option<watch::Receiver<Visibility>>,
) -> Option<Visibility> {
    match activity {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// 콜백 전달과 제어 호출을 직렬화하는 잠금
///
/// 재진입 가능하므로 콜백 안에서 `stop()`이나 `start()`를 불러도 된다.
pub(crate) type DispatchGate = parking_lot::ReentrantMutex<()>;

/// 코어 출력을 콜백으로 전달
///
/// `epoch`는 출력이 만들어진 시점의 에포크. 게이트를 잡은 뒤 출력마다 `current()`와
/// 비교하고, 그 사이 제어 호출이 끼어들었으면 남은 출력을 버린다.
pub(crate) fn dispatch(
    gate: &DispatchGate,
    handler: &dyn StreamHandler,
    epoch: u64,
    current: impl Fn() -> u64,
    outputs: Vec<SessionOutput>,
) {
    if outputs.is_empty() {
        return;
    }
    let _gate = gate.lock();
    for output in outputs {
        if current() != epoch {
            debug!("에포크 변경 ({epoch} → {}) — 남은 콜백 폐기", current());
            return;
        }
        match output {
            SessionOutput::Chunk { delta, accumulated } => handler.on_chunk(&delta, &accumulated),
            SessionOutput::Complete { text } => handler.on_complete(&text),
            SessionOutput::Error(error) => handler.on_error(&error),
        }
    }
}
