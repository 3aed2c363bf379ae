//! 터미널 출력 리스너.
//!
//! 델타를 도착 즉시 출력하고, 완료/에러 시 줄을 마무리한다.

use std::io::Write;
use std::sync::Arc;

use chatlink_core::error::StreamError;
use chatlink_core::ports::stream::StreamHandler;
use parking_lot::Mutex;

/// 델타를 writer로 흘려보내는 스트림 핸들러
pub struct ConsoleHandler<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleHandler<std::io::Stdout> {
    /// 표준 출력 핸들러
    pub fn stdout() -> Arc<Self> {
        Arc::new(Self::new(std::io::stdout()))
    }
}

impl<W: Write + Send> ConsoleHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> StreamHandler for ConsoleHandler<W> {
    fn on_chunk(&self, delta: &str, _accumulated: &str) {
        let mut out = self.out.lock();
        let _ = out.write_all(delta.as_bytes());
        let _ = out.flush();
    }

    fn on_complete(&self, _final_text: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }

    fn on_error(&self, error: &StreamError) {
        let mut out = self.out.lock();
        let _ = writeln!(out);
        let _ = writeln!(out, "[에러] {}", error.user_message());
        let _ = out.flush();
    }
}
