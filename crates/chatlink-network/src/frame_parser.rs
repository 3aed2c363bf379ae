//! 와이어 프로토콜 파서.
//!
//! 레코드 형식: `data: <payload>` 줄들 + 빈 줄(`\n\n`) 구분.
//! - `[DONE]` → 완료
//! - `{"type":"text","content":..}` → 콘텐츠 델타
//! - `{"type":"error","message":..}` → 치명적 스트림 내 에러
//! - `{"type":"ping"}`, 주석 레코드(`:`) → keep-alive
//! - JSON이 아닌 페이로드 → 원시 텍스트 델타
//!
//! [`RecordBuffer`]는 청크 경계에 걸친 레코드를 조립한다. 완전한 레코드가 모일 때까지
//! 아무것도 내보내지 않으므로 청크 분할 위치와 무관하게 델타가 유실/중복되지 않는다.

use chatlink_core::error::StreamError;
use chatlink_core::models::frame::{Frame, DONE_SENTINEL};
use serde_json::Value;
use tracing::debug;

/// 페이로드 하나를 프레임으로 변환
///
/// 알 수 없는 `type`의 JSON은 무시한다 (`Ok(None)`).
pub fn parse_payload(payload: &str) -> Result<Option<Frame>, StreamError> {
    if payload.trim() == DONE_SENTINEL {
        return Ok(Some(Frame::Done));
    }
    if payload.is_empty() {
        return Ok(None);
    }

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        // 구조화되지 않은 서버 호환: 원시 텍스트로 취급
        _ => return Ok(Some(Frame::chunk(payload))),
    };

    match value.get("type").and_then(Value::as_str) {
        Some("text") => match value.get("content") {
            Some(Value::String(content)) => Ok(Some(Frame::chunk(content.as_str()))),
            _ => Err(StreamError::Protocol {
                message: format!("text 프레임에 문자열 content 없음: {payload}"),
            }),
        },
        Some("error") => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("알 수 없는 서버 에러")
                .to_string();
            Ok(Some(Frame::Error { message }))
        }
        Some("ping") => Ok(Some(Frame::Ping)),
        other => {
            debug!("알 수 없는 프레임 타입 무시: {:?}", other);
            Ok(None)
        }
    }
}

/// 조립된 레코드 하나
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    /// `event:` 필드
    pub event: Option<String>,
    /// `data:` 줄들을 `\n`으로 결합한 값
    pub data: Option<String>,
    /// 주석 줄 포함 여부
    pub has_comment: bool,
}

impl SseRecord {
    /// 레코드를 프레임으로 변환
    pub fn into_frame(self) -> Result<Option<Frame>, StreamError> {
        if self.event.as_deref() == Some("ping") {
            return Ok(Some(Frame::Ping));
        }
        match self.data {
            Some(data) => parse_payload(&data),
            None if self.has_comment => Ok(Some(Frame::Ping)),
            None => Ok(None),
        }
    }

    fn parse(raw: &[u8]) -> Option<Self> {
        // UTF-8 디코딩은 레코드가 완성된 뒤에만 — 청크 경계에서 잘린 멀티바이트 문자 보호
        let text = String::from_utf8_lossy(raw);
        let mut record = SseRecord::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if line.starts_with(':') {
                record.has_comment = true;
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "event" => record.event = Some(value.to_string()),
                _ => {}
            }
        }

        if !data_lines.is_empty() {
            record.data = Some(data_lines.join("\n"));
        }
        if record.data.is_none() && record.event.is_none() && !record.has_comment {
            return None;
        }
        Some(record)
    }
}

/// 청크 경계를 넘는 레코드 조립 버퍼
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: Vec<u8>,
    scanned: usize,
}

impl RecordBuffer {
    /// 빈 버퍼
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크 추가 후 완성된 레코드 반환
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some((end, separator_len)) = self.find_record_end() {
            let rest = self.buf.split_off(end + separator_len);
            let raw = std::mem::replace(&mut self.buf, rest);
            self.scanned = 0;
            if let Some(record) = SseRecord::parse(&raw[..end]) {
                records.push(record);
            }
        }

        records
    }

    /// 아직 레코드가 되지 못한 바이트 수
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// 스트림 종료 — 미완성 꼬리는 버리고 버린 바이트 수 반환
    pub fn finish(&mut self) -> usize {
        let discarded = self.buf.len();
        if discarded > 0 {
            debug!("미완성 레코드 {discarded}바이트 폐기");
        }
        self.buf.clear();
        self.scanned = 0;
        discarded
    }

    /// 레코드 끝(`\n\n` 또는 `\n\r\n`)의 위치와 구분자 길이
    fn find_record_end(&mut self) -> Option<(usize, usize)> {
        let buf = &self.buf;
        let mut i = self.scanned;
        while i < buf.len() {
            if buf[i] == b'\n' {
                match (buf.get(i + 1), buf.get(i + 2)) {
                    (Some(b'\n'), _) => return Some((i, 2)),
                    (Some(b'\r'), Some(b'\n')) => return Some((i, 3)),
                    // 판단에 필요한 바이트가 아직 없음 — 다음 push에서 이 위치부터 재검사
                    (None, _) | (Some(b'\r'), None) => {
                        self.scanned = i;
                        return None;
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        self.scanned = buf.len();
        None
    }
}
