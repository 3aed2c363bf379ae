//! # chatlink-network
//!
//! 스트리밍 연결 계층 어댑터.
//! 브라우저 분류, 연결 상태 머신, 스트림 세션, 와이어 프로토콜 파서,
//! SSE/바이트 스트림 전송, 가시성 모니터, 호스트 바인딩을 담당한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use chatlink_core::config::AppConfig;
//! use chatlink_core::models::request::StreamRequest;
//! use chatlink_network::host_binding::HostBinding;
//!
//! let binding = HostBinding::from_config(&AppConfig::default_config(), None, None)?;
//! binding.start(StreamRequest::new("안녕하세요", "sess_1").with_token(jwt))?;
//! let mut rx = binding.subscribe();
//! ```

pub mod accumulator;
pub mod activity;
pub mod backoff;
pub mod capability;
pub mod chunked_session;
pub mod chunked_transport;
pub mod connection_manager;
pub mod endpoint;
pub mod frame_parser;
pub mod host_binding;
pub mod sse_transport;
pub mod stream_session;
pub mod timers;

#[cfg(test)]
pub(crate) mod test_support;
