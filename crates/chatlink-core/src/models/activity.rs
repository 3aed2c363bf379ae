//! 포그라운드/백그라운드 활동 신호 모델.

use serde::{Deserialize, Serialize};

/// 호스트 가시성 상태
///
/// 브라우저에서는 탭 visibility, 모바일 앱에서는 앱 생명주기 신호에 대응한다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// 사용자가 보고 있음
    #[default]
    Foreground,
    /// 백그라운드 (네트워크/타이머 스로틀링 대상)
    Background,
}

impl Visibility {
    /// 백그라운드 여부
    pub fn is_background(&self) -> bool {
        matches!(self, Visibility::Background)
    }
}
