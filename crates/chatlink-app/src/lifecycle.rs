//! 프로세스 라이프사이클.
//!
//! 종료 시그널 대기와, 가시성 시그널을 활동 모니터로 전달하는 작업.
//!
//! | 시그널 | 동작 |
//! |--------|------|
//! | SIGINT, SIGTERM | 스트림 중지 후 종료 |
//! | SIGUSR1 | 백그라운드 진입 |
//! | SIGUSR2 | 포그라운드 복귀 |

use anyhow::{Context, Result};
use chatlink_core::models::activity::Visibility;
use chatlink_network::activity::SharedActivityMonitor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// 종료 신호 전파기
pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    /// 종료 수신기
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 종료 신호 발송 (중복 호출 무시)
    pub fn shutdown(&self) {
        let sent = self.shutdown_tx.send_if_modified(|stopped| {
            if *stopped {
                return false;
            }
            *stopped = true;
            true
        });
        if sent {
            info!("종료 신호 발송");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// OS 종료 시그널을 기다린 뒤 종료 신호 발송
    pub async fn wait_for_signal(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint =
                signal(SignalKind::interrupt()).context("SIGINT 핸들러 등록 실패")?;
            let mut sigterm =
                signal(SignalKind::terminate()).context("SIGTERM 핸들러 등록 실패")?;

            tokio::select! {
                _ = sigint.recv() => info!("SIGINT 수신"),
                _ = sigterm.recv() => info!("SIGTERM 수신"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .context("Ctrl+C 핸들러 등록 실패")?;
            info!("Ctrl+C 수신");
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// SIGUSR1/SIGUSR2를 가시성 전환으로 전달하는 태스크 시작
#[cfg(unix)]
pub fn spawn_visibility_signals(monitor: SharedActivityMonitor) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hide = signal(SignalKind::user_defined1()).context("SIGUSR1 핸들러 등록 실패")?;
    let mut show = signal(SignalKind::user_defined2()).context("SIGUSR2 핸들러 등록 실패")?;

    Ok(tokio::spawn(async move {
        loop {
            let visibility = tokio::select! {
                received = hide.recv() => match received {
                    Some(()) => Visibility::Background,
                    None => break,
                },
                received = show.recv() => match received {
                    Some(()) => Visibility::Foreground,
                    None => break,
                },
            };
            if monitor.set_visibility(visibility) {
                info!("가시성 시그널: {:?}", visibility);
            }
        }
    }))
}

/// 가시성 시그널 미지원 플랫폼
#[cfg(not(unix))]
pub fn spawn_visibility_signals(_monitor: SharedActivityMonitor) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async {}))
}
