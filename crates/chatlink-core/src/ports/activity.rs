//! 활동 신호 포트.
//!
//! 포그라운드/백그라운드 신호는 플랫폼마다 다르므로 주입 가능한 소스로 둔다.
//! 구현: `chatlink-network::activity::ActivityMonitor`

use tokio::sync::watch;

use crate::models::activity::Visibility;

/// 가시성 신호 소스
pub trait ActivitySource: Send + Sync {
    /// 가시성 변경 수신기 생성
    fn subscribe(&self) -> watch::Receiver<Visibility>;
}
