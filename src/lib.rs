//! # NAP (Network Attachment Point)
//!
//! IP/HTTP 엔드포인트를 ICN pub/sub 코어에 연결하는 전송/세션 계층
//!
//! ## 핵심 특징
//! - **Forwarding Gate**: CID별 publish/buffer 상태머신, 광고 1회 보장
//! - **CMC 그룹**: 응답별 임시 멀티캐스트 그룹, all-or-nothing 승인
//! - **Last-Write-Wins 버퍼**: 키당 패킷 1개, 최신 요청 우선
//! - **세션 멀티플렉서**: rCID ↔ 로컬 소켓 세션 매핑 + 역방향 노드 인덱스
//! - **단편화/재조립**: MTU 기반 분할, 순서 무관 버퍼링 조립 (unreliable)
//! - **네임스페이스 디스패치**: 루트 스코프 기준 IP/HTTP/제어 경로 분기

pub mod buffer;
pub mod cmc;
pub mod config;
pub mod error;
pub mod facade;
pub mod fragment;
pub mod gate;
pub mod identifier;
pub mod routing;
pub mod session;
pub mod stats;
pub mod sweep;

pub use buffer::{PacketKey, PendingPacket, PendingPacketBuffer};
pub use cmc::{CmcGroupManager, GroupResolution, SessionEndSignal};
pub use config::Config;
pub use error::{Error, Result};
pub use facade::{HttpUnit, TransportFacade, TransportOutcome};
pub use fragment::{FragmentHeader, FragmentState, PacketSink, UnreliableTransport};
pub use gate::{ForwardingGate, SubmitOutcome};
pub use identifier::{ContentIdentifier, Namespace};
pub use routing::{RoutingCore, RoutingEvent};
pub use session::{SessionMultiplexer, SessionSink};
pub use stats::NapStats;
pub use sweep::SweeperHandle;

/// 식별자 세그먼트 폭 (16진수 문자 수)
pub const SEGMENT_HEX_WIDTH: usize = 16;

/// 단편화 유닛 헤더 크기 (바이트): key(4) + state(1) + sequence(1) + payload_len(2)
pub const FRAGMENT_HEADER_SIZE: usize = 8;

/// 기본 경로 MTU (바이트)
pub const DEFAULT_PATH_MTU: usize = 1500;

/// 세션 키 타입 (로컬 소켓 디스크립터)
pub type SessionKey = i32;

/// 닫힌 세션을 표시하는 센티널 값
pub const INVALID_SESSION_KEY: SessionKey = -1;

/// 요청/응답 교환을 묶는 상관 태그
pub type CorrelationTag = u64;

/// 원격 NAP 노드 식별자
pub type NodeId = String;
