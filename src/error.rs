//! 에러 타입 정의

use thiserror::Error;

/// NAP 전송 계층 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 식별자: {identifier}")]
    InvalidIdentifier { identifier: String },

    #[error("식별자 일시정지 상태: 제출 거부됨")]
    IdentifierPaused,

    #[error("라우팅 미스: rCID={rcid:08x}, tag={tag}")]
    RoutingMiss { rcid: u32, tag: u64 },

    #[error("CMC 그룹 형성 실패: rCID={rcid:08x}, {attempts}회 시도 후 포기")]
    GroupFormation { rcid: u32, attempts: u32 },

    #[error("세션 없음: key={session_key}")]
    SessionNotFound { session_key: i32 },

    #[error("단편화 헤더 파싱 실패: {len}바이트")]
    InvalidFragmentHeader { len: usize },

    #[error("페이로드 초과: {len}바이트, 최대 {max}바이트")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("라우팅 코어 호출 실패: {0}")]
    RoutingCore(String),

    #[error("채널 에러")]
    ChannelError,

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
