//! 브라우저 능력 분류기.
//!
//! User-Agent 문자열을 quirk 플래그와 권장 전송 설정으로 변환한다.
//! 순수 함수 — I/O, 부수효과 없음.
//!
//! Safari/iOS WebKit 계열은 백그라운드 탭에서 연결을 조용히 멈추거나 끊는 경향이 있어
//! 더 짧은 타임아웃을 사용한다.

use chatlink_core::config::TimeoutOverrides;
use std::time::Duration;

/// 브라우저별 동작 특이점
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// 백그라운드 진입 시 연결/타이머가 정지됨 (모바일 전반)
    pub suspends_in_background: bool,
    /// 에러 없이 스트림이 멈추는 경우가 잦음 (Safari 계열)
    pub silent_stall: bool,
    /// 유휴 연결을 공격적으로 끊음 (iOS)
    pub drops_idle_connections: bool,
}

/// 분류 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrowserClassification {
    /// 문제 브라우저 계열 (Safari 또는 iOS WebKit)
    pub is_target_browser: bool,
    /// 모바일 변형
    pub is_mobile_variant: bool,
    /// 특이점 플래그
    pub quirks: Quirks,
}

/// 권장 전송 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimalConfig {
    /// 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,
    /// 연결 후 유휴 타임아웃 (밀리초)
    pub idle_timeout_ms: u64,
    /// keep-alive 주기 (밀리초)
    pub keep_alive_interval_ms: u64,
    /// 백그라운드 처리 활성화
    pub background_handling_enabled: bool,
}

impl OptimalConfig {
    /// 연결 타임아웃
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 유휴 타임아웃
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// keep-alive 주기
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// 설정 파일 오버라이드 적용
    pub fn with_overrides(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(ms) = overrides.connect_timeout_ms {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = overrides.idle_timeout_ms {
            self.idle_timeout_ms = ms;
        }
        if let Some(ms) = overrides.keep_alive_interval_ms {
            self.keep_alive_interval_ms = ms;
        }
        self
    }
}

impl Default for OptimalConfig {
    fn default() -> Self {
        BrowserClassification::default().optimal_config()
    }
}

/// User-Agent 분류
pub fn classify(user_agent: &str) -> BrowserClassification {
    let ua = user_agent.to_ascii_lowercase();

    // iPadOS 13+ 는 데스크톱 UA를 쓰지만 "Mobile/" 토큰이 남는다
    let is_ios = ["iphone", "ipad", "ipod"].iter().any(|t| ua.contains(t))
        || (ua.contains("macintosh") && ua.contains("mobile/"));
    let is_android = ua.contains("android");
    let is_mobile = is_ios || is_android || ua.contains("mobile");

    let other_engine = ["chrome", "chromium", "crios", "fxios", "edg", "opr", "android"]
        .iter()
        .any(|t| ua.contains(t));
    let is_safari = ua.contains("safari") && !other_engine;

    // iOS의 모든 브라우저는 WebKit이므로 같은 특이점을 가진다
    let is_target = is_safari || is_ios;

    BrowserClassification {
        is_target_browser: is_target,
        is_mobile_variant: is_mobile,
        quirks: Quirks {
            suspends_in_background: is_mobile,
            silent_stall: is_target,
            drops_idle_connections: is_ios,
        },
    }
}

impl BrowserClassification {
    /// User-Agent로부터 분류
    pub fn from_user_agent(user_agent: &str) -> Self {
        classify(user_agent)
    }

    /// 권장 전송 설정
    pub fn optimal_config(&self) -> OptimalConfig {
        match (self.is_target_browser, self.is_mobile_variant) {
            (true, true) => OptimalConfig {
                connect_timeout_ms: 15_000,
                idle_timeout_ms: 30_000,
                keep_alive_interval_ms: 15_000,
                background_handling_enabled: true,
            },
            (true, false) => OptimalConfig {
                connect_timeout_ms: 15_000,
                idle_timeout_ms: 45_000,
                keep_alive_interval_ms: 20_000,
                background_handling_enabled: true,
            },
            (false, mobile) => OptimalConfig {
                connect_timeout_ms: 30_000,
                idle_timeout_ms: 60_000,
                keep_alive_interval_ms: 30_000,
                background_handling_enabled: mobile,
            },
        }
    }

    /// 백엔드 버퍼링 조정용 URL 힌트 (`safari=1`, `mobile=1`)
    pub fn url_hints(&self) -> Vec<(&'static str, &'static str)> {
        let mut hints = Vec::new();
        if self.is_target_browser {
            hints.push(("safari", "1"));
        }
        if self.is_mobile_variant {
            hints.push(("mobile", "1"));
        }
        hints
    }
}
