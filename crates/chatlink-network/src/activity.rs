//! 호스트 가시성 신호.
//!
//! 호스트(브라우저 탭, 모바일 앱, 터미널)가 포그라운드/백그라운드 전환을 알리면
//! 구독 중인 세션에 전파한다. 같은 값이 반복되면 알리지 않는다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatlink_core::models::activity::Visibility;
use chatlink_core::ports::activity::ActivitySource;
use tokio::sync::watch;
use tracing::{debug, info};

/// 가시성 모니터
pub struct ActivityMonitor {
    /// 상태 변경 브로드캐스트
    visibility_tx: watch::Sender<Visibility>,
    /// 전환 횟수
    transitions: AtomicU64,
}

impl ActivityMonitor {
    /// 포그라운드 상태로 시작
    pub fn new() -> Self {
        Self::with_initial(Visibility::Foreground)
    }

    /// 초기 가시성 지정
    pub fn with_initial(initial: Visibility) -> Self {
        let (visibility_tx, _) = watch::channel(initial);
        Self {
            visibility_tx,
            transitions: AtomicU64::new(0),
        }
    }

    /// 가시성 변경. 실제로 바뀌었으면 `true`.
    pub fn set_visibility(&self, visibility: Visibility) -> bool {
        let changed = self.visibility_tx.send_if_modified(|current| {
            if *current == visibility {
                return false;
            }
            *current = visibility;
            true
        });

        if changed {
            let count = self.transitions.fetch_add(1, Ordering::Relaxed) + 1;
            info!("가시성 전환: {:?} (누적 {}회)", visibility, count);
        } else {
            debug!("가시성 변화 없음: {:?}", visibility);
        }
        changed
    }

    /// 백그라운드 여부 지정
    pub fn set_background(&self, background: bool) -> bool {
        self.set_visibility(if background {
            Visibility::Background
        } else {
            Visibility::Foreground
        })
    }

    /// 현재 가시성
    pub fn visibility(&self) -> Visibility {
        *self.visibility_tx.borrow()
    }

    /// 백그라운드 여부
    pub fn is_background(&self) -> bool {
        self.visibility().is_background()
    }

    /// 누적 전환 횟수
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for ActivityMonitor {
    fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.visibility_tx.subscribe()
    }
}

/// Arc로 감싼 ActivityMonitor
pub type SharedActivityMonitor = Arc<ActivityMonitor>;
