//! 데드라인 기반 타이머 집합.
//!
//! 상태 머신은 실제 타이머를 생성하지 않고 데드라인만 기록한다.
//! 구동 태스크가 `next_deadline()`까지 대기한 뒤 `take_expired()`로 만료된 타이머를 꺼낸다.
//! 정리(`clear`)된 타이머는 다시 발화할 수 없다.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::time::Instant;

/// 키별 단일 데드라인 타이머 집합
#[derive(Debug, Clone)]
pub struct TimerSet<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> TimerSet<K> {
    /// 빈 타이머 집합
    pub fn new() -> Self {
        Self::default()
    }

    /// 타이머 설정 (같은 키가 있으면 교체)
    pub fn arm(&mut self, key: K, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    /// 타이머 해제
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    /// 모든 타이머 해제
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    /// 설정 여부
    pub fn is_armed(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    /// 대기 중인 타이머 수
    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }

    /// 키의 데드라인
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.deadlines.get(&key).copied()
    }

    /// 가장 이른 데드라인
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// `now` 기준 만료된 타이머를 제거하고 (데드라인, 키) 순으로 반환
    pub fn take_expired(&mut self, now: Instant) -> Vec<K> {
        let mut expired: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        expired.sort();
        for (_, key) in &expired {
            self.deadlines.remove(key);
        }
        expired.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    enum Key {
        A,
        B,
        C,
    }

    #[test]
    fn expired_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(Key::A, now + Duration::from_millis(30));
        timers.arm(Key::B, now + Duration::from_millis(10));
        timers.arm(Key::C, now + Duration::from_millis(100));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));

        let fired = timers.take_expired(now + Duration::from_millis(50));
        assert_eq!(fired, vec![Key::B, Key::A]);
        assert_eq!(timers.pending(), 1);
        assert!(timers.is_armed(Key::C));
    }

    #[test]
    fn rearm_replaces_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(Key::A, now + Duration::from_millis(10));
        timers.arm(Key::A, now + Duration::from_millis(500));

        assert!(timers.take_expired(now + Duration::from_millis(20)).is_empty());
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(Key::A, now);
        assert!(timers.cancel(Key::A));
        assert!(!timers.cancel(Key::A));
        assert!(timers.take_expired(now + Duration::from_secs(1)).is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
