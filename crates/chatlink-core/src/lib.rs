//! # chatlink-core
//!
//! 채팅 위젯 스트리밍 연결 계층의 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`] — 연결 상태, 프레임, 요청, 메트릭
//! - [`ports`] — 전송/활동 신호/스트림 콜백 포트 인터페이스
//! - [`error`] — 인프라 에러와 분류된 스트림 에러 (thiserror)
//! - [`config`] — 애플리케이션 설정 구조체
//! - [`config_manager`] — 설정 파일 관리 (로드/저장)

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;
