//! # chatlink
//!
//! 스트리밍 완성 엔드포인트에 질의 하나를 보내고 응답을 터미널로 흘려보내는 CLI.
//! 설정 파일 로드, CLI 오버라이드, 세션 구동, 시그널 처리를 담당한다.

mod console;
mod lifecycle;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chatlink_core::config::AppConfig;
use chatlink_core::config_manager::ConfigManager;
use chatlink_core::models::connection::TransportKind;
use chatlink_core::models::request::StreamRequest;
use chatlink_core::ports::activity::ActivitySource;
use chatlink_core::ports::stream::StreamHandler;
use chatlink_network::activity::{ActivityMonitor, SharedActivityMonitor};
use chatlink_network::host_binding::{BindingSnapshot, BindingStatus, HostBinding};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleHandler;
use crate::lifecycle::Lifecycle;

/// chatlink 스트리밍 클라이언트
///
/// 응답 델타는 stdout, 로그와 메트릭은 stderr로 출력한다.
#[derive(Parser, Debug)]
#[command(name = "chatlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 보낼 질의
    input: String,

    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 스트리밍 엔드포인트 URL
    #[arg(long, short = 'e')]
    endpoint: Option<String>,

    /// 레거시 인증용 테넌트 해시
    #[arg(long)]
    tenant_hash: Option<String>,

    /// Bearer 토큰 (지정 시 테넌트 해시보다 우선)
    #[arg(long)]
    token: Option<String>,

    /// 대화 세션 ID (기본: 새로 생성)
    #[arg(long)]
    session_id: Option<String>,

    /// 전송 방식
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// 브라우저 분류에 사용할 User-Agent
    #[arg(long)]
    user_agent: Option<String>,

    /// 최대 재연결 시도 횟수
    #[arg(long)]
    max_attempts: Option<u32>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "warn")]
    log_level: String,
}

/// CLI 전송 방식 이름
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    /// text/event-stream 이벤트 전송
    Push,
    /// 원시 바이트 스트림
    Chunked,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Push => TransportKind::PushEvent,
            TransportArg::Chunked => TransportKind::ChunkedStream,
        }
    }
}

/// 설정 로드
///
/// 경로를 지정하면 해당 파일을 쓰고(없으면 기본값으로 생성), 아니면 플랫폼
/// 기본 경로를 쓴다. 기본 경로를 쓸 수 없으면 기본 설정으로 진행한다.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let manager = ConfigManager::with_path(path.to_path_buf())
                .with_context(|| format!("설정 로드 실패: {}", path.display()))?;
            Ok(manager.get())
        }
        None => match ConfigManager::new() {
            Ok(manager) => {
                info!("설정 파일: {}", manager.config_path().display());
                Ok(manager.get())
            }
            Err(e) => {
                warn!("기본 설정 경로 사용 불가, 기본값 사용: {}", e);
                Ok(AppConfig::default_config())
            }
        },
    }
}

/// CLI 인자로 설정 오버라이드
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(ref url) = args.endpoint {
        config.endpoint.url = url.clone();
    }
    if let Some(ref hash) = args.tenant_hash {
        config.endpoint.tenant_hash = Some(hash.clone());
    }
    if let Some(transport) = args.transport {
        config.endpoint.transport = transport.into();
    }
    if let Some(ref ua) = args.user_agent {
        config.endpoint.user_agent = Some(ua.clone());
    }
    if let Some(max_attempts) = args.max_attempts {
        config.reconnect.max_attempts = max_attempts;
    }
}

/// 세션 ID 생성
fn generate_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}

fn build_request(args: &Args) -> StreamRequest {
    let session_id = args.session_id.clone().unwrap_or_else(generate_session_id);
    let request = StreamRequest::new(args.input.clone(), session_id);
    match args.token {
        Some(ref token) => request.with_token(token.clone()),
        None => request,
    }
}

/// 요청을 시작하고 종료 상태 또는 종료 신호까지 대기
async fn stream_until_done(
    binding: &HostBinding,
    request: StreamRequest,
    lifecycle: &Lifecycle,
) -> Result<BindingSnapshot> {
    let mut state_rx = binding.subscribe();
    let mut shutdown_rx = lifecycle.subscribe();

    binding.start(request)?;

    tokio::select! {
        finished = state_rx.wait_for(|snapshot| !snapshot.status.is_busy()) => {
            let snapshot = finished
                .map_err(|_| anyhow!("세션 상태 채널 종료"))?
                .clone();
            Ok(snapshot)
        }
        _ = shutdown_rx.wait_for(|stopped| *stopped) => {
            binding.stop();
            Ok(binding.snapshot())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout은 응답 본문 전용
    let log_filter = format!(
        "chatlink={0},chatlink_app={0},chatlink_core={0},chatlink_network={0}",
        args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    let request = build_request(&args);
    info!(
        "chatlink 시작: {} ({})",
        config.endpoint.url, config.endpoint.transport
    );

    let monitor: SharedActivityMonitor = Arc::new(ActivityMonitor::new());
    let visibility_task = lifecycle::spawn_visibility_signals(monitor.clone())?;

    let activity: &dyn ActivitySource = monitor.as_ref();
    let listener: Arc<dyn StreamHandler> = ConsoleHandler::stdout();
    let binding = HostBinding::from_config(&config, Some(activity), Some(listener))?;

    let lifecycle = Arc::new(Lifecycle::new());
    let signal_task = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.wait_for_signal().await {
                warn!("시그널 대기 실패: {}", e);
            }
        })
    };

    let outcome = stream_until_done(&binding, request, &lifecycle).await;
    signal_task.abort();
    visibility_task.abort();
    let snapshot = outcome?;

    eprintln!("{}", serde_json::to_string_pretty(&binding.metrics())?);

    match snapshot.status {
        BindingStatus::Failed => {
            let message = snapshot
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "알 수 없는 에러".to_string());
            Err(anyhow!(message))
        }
        BindingStatus::Stopped => {
            info!("사용자 중지");
            Ok(())
        }
        _ => Ok(()),
    }
}
