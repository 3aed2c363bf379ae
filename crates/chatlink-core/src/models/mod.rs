//! chatlink 도메인 모델.
//!
//! 연결 상태, 프레임, 요청, 메트릭 등 크레이트 간 공유하는 데이터 구조체.

pub mod activity;
pub mod connection;
pub mod frame;
pub mod metrics;
pub mod request;
