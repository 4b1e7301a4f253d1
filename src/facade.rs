//! 전송 파사드
//!
//! 식별자의 루트 네임스페이스로 경로를 고르는 순수 디스패치.
//! IP 루트는 단편화/재조립으로, HTTP 루트는 게이트/CMC/세션으로,
//! 그 외 루트는 전송이 필요 없는 제어 메시지로 처리.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::{PendingPacket, PendingPacketBuffer};
use crate::cmc::CmcGroupManager;
use crate::config::Config;
use crate::error::Result;
use crate::sweep::SweeperHandle;
use crate::fragment::UnreliableTransport;
use crate::gate::{ForwardingGate, SubmitOutcome};
use crate::identifier::{ContentIdentifier, Namespace};
use crate::routing::{RoutingCore, RoutingEvent};
use crate::session::SessionMultiplexer;
use crate::{CorrelationTag, SessionKey};

/// handle 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// 전송 계층이 처리 완료, 추가 조치 불필요
    NoActionRequired,

    /// 전송 프로토콜 대상이 아님 (제어 메시지)
    NoTransportProtocolUsed,

    /// 로컬 세션으로 전달됨
    Deliver {
        tag: CorrelationTag,
        session_key: SessionKey,
    },
}

/// HTTP 전송 유닛 (CMC 경로의 와이어 페이로드)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpUnit {
    /// 상관 태그
    pub tag: CorrelationTag,

    /// 발신측 세션 키
    pub session_key: SessionKey,

    /// HTTP 페이로드
    pub payload: Vec<u8>,
}

impl HttpUnit {
    pub fn new(tag: CorrelationTag, session_key: SessionKey, payload: &[u8]) -> Self {
        Self {
            tag,
            session_key,
            payload: payload.to_vec(),
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// 전송 파사드
pub struct TransportFacade {
    fragment: Arc<UnreliableTransport>,
    gate: Arc<ForwardingGate>,
    cmc: Arc<CmcGroupManager>,
    sessions: Arc<SessionMultiplexer>,
    buffer: Arc<PendingPacketBuffer>,
    core: Arc<dyn RoutingCore>,
}

impl TransportFacade {
    /// 새 파사드 생성 (명시적 의존성 주입)
    pub fn new(
        fragment: Arc<UnreliableTransport>,
        gate: Arc<ForwardingGate>,
        cmc: Arc<CmcGroupManager>,
        sessions: Arc<SessionMultiplexer>,
        buffer: Arc<PendingPacketBuffer>,
        core: Arc<dyn RoutingCore>,
    ) -> Self {
        Self {
            fragment,
            gate,
            cmc,
            sessions,
            buffer,
            core,
        }
    }

    /// 주기 정리 태스크 시작
    ///
    /// 설정된 축출 시한이 모두 0이면 sweep은 전부 no-op이지만
    /// 핸들은 동일하게 반환한다. `stop()`으로 중단.
    pub fn spawn_sweeper(&self, config: &Config) -> SweeperHandle {
        let fragment = self.fragment.clone();
        let cmc = self.cmc.clone();
        let buffer = self.buffer.clone();

        let reassembly_age = Duration::from_millis(config.reassembly_eviction_ms);
        let potential_age = Duration::from_millis(config.potential_group_eviction_ms);
        let pending_age = Duration::from_millis(config.pending_buffer_eviction_ms);
        let interval = Duration::from_millis(config.buffer_sweep_interval_ms);

        SweeperHandle::spawn(interval, move || {
            fragment.sweep(reassembly_age);
            cmc.sweep_potential(potential_age);
            buffer.sweep(pending_age);
        })
    }

    /// 인바운드 페이로드 처리 (루트 네임스페이스 디스패치)
    pub fn handle(&self, identifier: &ContentIdentifier, payload: &[u8]) -> TransportOutcome {
        match identifier.root_namespace() {
            Namespace::Ip => {
                if let Err(e) = self.fragment.handle(identifier, payload) {
                    warn!("단편화 유닛 처리 실패: {}", e);
                }
                TransportOutcome::NoActionRequired
            }

            Namespace::Http => {
                let unit = match HttpUnit::from_bytes(payload) {
                    Some(u) => u,
                    None => {
                        warn!("HTTP 유닛 파싱 실패: {}바이트 드롭", payload.len());
                        return TransportOutcome::NoActionRequired;
                    }
                };

                let rcid = identifier.hash32();
                if !self.sessions.route_inbound(rcid, unit.tag, &unit.payload) {
                    return TransportOutcome::NoActionRequired;
                }

                TransportOutcome::Deliver {
                    tag: unit.tag,
                    session_key: unit.session_key,
                }
            }

            // 관리/멀티캐스트/미지 루트는 전송 프로토콜 대상 아님
            _ => TransportOutcome::NoTransportProtocolUsed,
        }
    }

    /// IP 경로 발행 (단편화)
    pub fn send_ip(&self, identifier: &ContentIdentifier, payload: &[u8]) -> Result<()> {
        self.fragment.publish(identifier, payload)
    }

    /// HTTP 요청 제출 (게이트 경유)
    pub fn submit_request(&self, packet: PendingPacket) -> Result<SubmitOutcome> {
        self.gate.submit(packet)
    }

    /// HTTP 응답 전달 (CMC 그룹 경유)
    ///
    /// 그룹 해석에 실패하면 응답을 last-write-wins 버퍼에 남기고
    /// 실패를 호출자에게 보고
    pub async fn deliver_response(
        &self,
        rcid: &ContentIdentifier,
        tag: CorrelationTag,
        session_key: SessionKey,
        payload: &[u8],
        is_first_packet: bool,
    ) -> Result<()> {
        match self
            .cmc
            .resolve_group_with_retry(rcid, tag, session_key, is_first_packet)
            .await
        {
            Ok(members) => {
                let unit = HttpUnit::new(tag, session_key, payload);
                self.core
                    .publish_data_to_group(rcid, &members, Bytes::from(unit.to_bytes()))
            }
            Err(e) => {
                // rCID를 쌍 키에 넣어야 세션 종료 시 remove_matching이 찾음
                self.buffer.insert(PendingPacket::new(
                    rcid.clone(),
                    Some(rcid.clone()),
                    tag,
                    session_key,
                    None,
                    Bytes::copy_from_slice(payload),
                ));
                Err(e)
            }
        }
    }

    /// 노드 라우팅 가능 신호
    ///
    /// 사이드 테이블 갱신 후, 그 노드가 기다리던 rCID 해시들을 반환
    /// (호출자가 resolve 재시도를 트리거)
    pub fn on_node_routable(&self, node: &str) -> Vec<u32> {
        self.cmc.set_node_routable(node, true);
        let awaited = self.sessions.take_awaited(node);
        if !awaited.is_empty() {
            debug!("노드 {} 라우팅 가능: 대기 rCID {}개 재시도", node, awaited.len());
        }
        awaited
    }

    /// 라우팅 코어 이벤트 펌프
    pub fn on_routing_event(&self, event: RoutingEvent) -> TransportOutcome {
        match event {
            RoutingEvent::StartPublish(cid) => {
                self.gate.on_start_publish(&cid);
                TransportOutcome::NoActionRequired
            }

            RoutingEvent::StopPublish(cid) => {
                self.gate.on_stop_publish(&cid);
                TransportOutcome::NoActionRequired
            }

            // 재발행 요청: forwarding을 내리고 다음 제출에서 재광고
            RoutingEvent::RePublish(cid) => {
                self.gate.on_stop_publish(&cid);
                TransportOutcome::NoActionRequired
            }

            RoutingEvent::PausePublish(cid) => {
                self.gate.pause(&cid);
                TransportOutcome::NoActionRequired
            }

            RoutingEvent::ResumePublish(cid) => {
                self.gate.resume(&cid);
                TransportOutcome::NoActionRequired
            }

            RoutingEvent::PublishedData { identifier, data } => self.handle(&identifier, &data),

            // 암묵적 구독: 원격 노드가 응답 대기자로 등록됨
            RoutingEvent::PublishedDataImplicitSub {
                identifier,
                node,
                data,
            } => {
                let rcid = identifier.hash32();
                if let Some(unit) = HttpUnit::from_bytes(&data) {
                    self.cmc.announce_ready(rcid, unit.tag, &node);
                    self.sessions.node_awaits(&node, rcid);
                    debug!("응답 대기 등록: node={}, rcid={:08x}, tag={}", node, rcid, unit.tag);
                } else {
                    warn!("암묵적 구독 유닛 파싱 실패: node={}", node);
                }
                TransportOutcome::NoActionRequired
            }

            RoutingEvent::ScopePublished(cid) | RoutingEvent::ScopeUnpublished(cid) => {
                debug!("스코프 이벤트: cid={:08x}", cid.hash32());
                TransportOutcome::NoTransportProtocolUsed
            }
        }
    }
}
