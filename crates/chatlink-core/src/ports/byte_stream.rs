//! 바이트 스트림 포트.
//!
//! 구현: `chatlink-network` crate (`HttpByteStream`, reqwest)

use async_trait::async_trait;
use futures::stream::BoxStream;
use url::Url;

use crate::error::CoreError;

/// 원시 바이트 청크 스트림. 청크 경계는 레코드 경계와 무관하다.
pub type ByteChunkStream = BoxStream<'static, Result<Vec<u8>, CoreError>>;

/// 바이트 스트림 연결자
#[async_trait]
pub trait ByteStreamOpener: Send + Sync {
    /// 연결을 열고 응답 본문 스트림 반환
    ///
    /// 연결 수립(응답 헤더 수신) 후에 반환한다.
    async fn open(&self, url: &Url) -> Result<ByteChunkStream, CoreError>;
}
