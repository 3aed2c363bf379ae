//! 재연결 백오프 정책.
//!
//! `delay = min(base * 2^attempt, cap)`에 ±jitter 적용. 지터 후에도 cap을 넘지 않는다.
//! 지터 지연은 이전 시도의 최대 지연 아래로 내려가지 않으므로, 시도가 늘어날수록
//! 지연은 비감소이고 cap에 도달한 뒤에는 cap으로 고정된다.

use chatlink_core::config::ReconnectConfig;
use std::time::Duration;

/// 지수 백오프 정책
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    /// 새 정책 생성
    pub fn new(base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// 설정으로부터 생성
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter_ratio)
    }

    /// 지터 없는 명목 지연. `attempt`에 대해 단조 비감소.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// 지터 적용 지연
    ///
    /// `unit`은 [-1.0, 1.0] 범위의 난수.
    pub fn delay_with_unit(&self, attempt: u32, unit: f64) -> Duration {
        let jittered = self.jittered(attempt, unit);
        match attempt.checked_sub(1) {
            Some(previous) => jittered.max(self.jittered(previous, 1.0)),
            None => jittered,
        }
    }

    fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let scale = 1.0 + self.jitter_ratio * unit.clamp(-1.0, 1.0);
        nominal.mul_f64(scale.max(0.0)).min(self.cap)
    }

    /// 난수 지터 적용 지연
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = rand::random::<f64>() * 2.0 - 1.0;
        self.delay_with_unit(attempt, unit)
    }

    /// 최대 지연
    pub fn cap(&self) -> Duration {
        self.cap
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
