//! CMC 그룹 관리자
//!
//! 응답 1건을 위한 임시 멀티캐스트 전달 그룹의 승인과 해체.
//!
//! - potential: 요청 송신을 마치고 응답을 기다린다고 알린 원격 노드들
//! - locked: 커밋된 전달 집합, 키당 1회 생성, 명시적 해체로만 삭제
//! - 승인은 all-or-nothing: 준비된 노드 중 하나라도 전달 경로가
//!   없으면 시도 전체를 포기하고 potential은 건드리지 않음
//! - 그룹 형성은 응답의 첫 패킷에서만 시도 가능

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifier::ContentIdentifier;
use crate::routing::RoutingCore;
use crate::stats::NapStats;
use crate::{CorrelationTag, NodeId, SessionKey};

/// potential 그룹 멤버
#[derive(Debug, Clone)]
struct PotentialMember {
    /// 요청 송신 완료(응답 대기) 여부
    ready: bool,

    /// 알림 시각 (축출 정책용)
    announced_at: Instant,
}

/// 그룹 해체 신호 (멤버에게 발행되는 제어 페이로드)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndSignal {
    pub tag: CorrelationTag,
    pub session_key: SessionKey,
}

impl SessionEndSignal {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// resolve_group 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupResolution {
    /// 커밋된 그룹으로 전달 가능
    Deliver(Vec<NodeId>),

    /// 아직 그룹 없음, 호출자는 버퍼링해야 함
    MustBuffer,
}

/// 해체 대기 키
type CloseKey = (u32, CorrelationTag, SessionKey);

/// CMC 그룹 관리자
pub struct CmcGroupManager {
    /// rCID 해시 → tag → node → potential 멤버
    potential: DashMap<u32, HashMap<CorrelationTag, HashMap<NodeId, PotentialMember>>>,

    /// rCID 해시 → tag → session key → 커밋된 멤버 목록
    locked: DashMap<u32, HashMap<CorrelationTag, HashMap<SessionKey, Vec<NodeId>>>>,

    /// 노드별 전달 경로 존재 여부 (사이드 테이블)
    routable: DashMap<NodeId, bool>,

    /// 해체 ack 대기 집합
    pending_closes: Mutex<HashMap<CloseKey, HashSet<NodeId>>>,

    /// ack 도착 알림
    close_notify: Notify,

    config: Config,
    core: Arc<dyn RoutingCore>,
    stats: Arc<RwLock<NapStats>>,
}

impl CmcGroupManager {
    /// 새 그룹 관리자 생성
    pub fn new(config: Config, core: Arc<dyn RoutingCore>, stats: Arc<RwLock<NapStats>>) -> Self {
        Self {
            potential: DashMap::new(),
            locked: DashMap::new(),
            routable: DashMap::new(),
            pending_closes: Mutex::new(HashMap::new()),
            close_notify: Notify::new(),
            config,
            core,
            stats,
        }
    }

    /// 노드가 요청 송신을 시작했음을 기록 (아직 응답 대기 아님)
    pub fn announce_request(&self, rcid: u32, tag: CorrelationTag, node: &str) {
        let mut tags = self.potential.entry(rcid).or_default();
        tags.entry(tag).or_default().entry(node.to_string()).or_insert(
            PotentialMember {
                ready: false,
                announced_at: Instant::now(),
            },
        );
    }

    /// 노드가 요청 송신을 마치고 응답을 기다림을 기록
    pub fn announce_ready(&self, rcid: u32, tag: CorrelationTag, node: &str) {
        let mut tags = self.potential.entry(rcid).or_default();
        let member = tags
            .entry(tag)
            .or_default()
            .entry(node.to_string())
            .or_insert(PotentialMember {
                ready: false,
                announced_at: Instant::now(),
            });
        member.ready = true;
    }

    /// 노드 전달 경로 존재 여부 갱신
    pub fn set_node_routable(&self, node: &str, routable: bool) {
        self.routable.insert(node.to_string(), routable);
    }

    /// 그룹 해석
    ///
    /// 1. 커밋된 그룹이 있으면 그대로 반환 (멱등, potential 재스캔 없음)
    /// 2. 첫 패킷이 아니면 형성 시도 없이 MustBuffer
    /// 3. 준비된 멤버 중 경로 없는 노드가 하나라도 있으면 전체 포기,
    ///    potential은 그대로 둠
    /// 4. 전원 경로 확보 시 locked에 커밋, 승인된 멤버는 potential에서 제거
    pub fn resolve_group(
        &self,
        rcid: &ContentIdentifier,
        tag: CorrelationTag,
        session_key: SessionKey,
        is_first_packet: bool,
    ) -> GroupResolution {
        // 빈 rCID는 호출자 계약 위반
        debug_assert!(!rcid.is_empty(), "resolve_group: 빈 rCID");
        let rcid_hash = rcid.hash32();

        // 1. 커밋된 그룹 fast path
        if let Some(tags) = self.locked.get(&rcid_hash) {
            if let Some(members) = tags.get(&tag).and_then(|keys| keys.get(&session_key)) {
                if !members.is_empty() {
                    return GroupResolution::Deliver(members.clone());
                }
            }
        }

        // 2. 형성은 첫 패킷에서만
        if !is_first_packet {
            return GroupResolution::MustBuffer;
        }

        // 3. potential 스캔 (all-or-nothing)
        let admitted: Vec<NodeId> = {
            let tags = match self.potential.get(&rcid_hash) {
                Some(t) => t,
                None => return GroupResolution::MustBuffer,
            };
            let nodes = match tags.get(&tag) {
                Some(n) => n,
                None => return GroupResolution::MustBuffer,
            };

            let ready: Vec<&NodeId> = nodes
                .iter()
                .filter(|(_, m)| m.ready)
                .map(|(node, _)| node)
                .collect();

            if ready.is_empty() {
                return GroupResolution::MustBuffer;
            }

            let unroutable = ready.iter().find(|node| {
                !self
                    .routable
                    .get(node.as_str())
                    .map(|r| *r)
                    .unwrap_or(false)
            });

            if let Some(node) = unroutable {
                // 부분 그룹은 절대 승인하지 않음
                debug!(
                    "그룹 형성 포기: rcid={:08x}, tag={}, 경로 없는 노드 {}",
                    rcid_hash, tag, node
                );
                self.stats.write().groups_abandoned += 1;
                return GroupResolution::MustBuffer;
            }

            ready.into_iter().cloned().collect()
        };

        // 4. 커밋 + potential 정리
        {
            let mut tags = self.locked.entry(rcid_hash).or_default();
            tags.entry(tag)
                .or_default()
                .insert(session_key, admitted.clone());
        }

        if let Some(mut tags) = self.potential.get_mut(&rcid_hash) {
            if let Some(nodes) = tags.get_mut(&tag) {
                for node in &admitted {
                    nodes.remove(node);
                }
                if nodes.is_empty() {
                    tags.remove(&tag);
                }
            }
            if tags.is_empty() {
                drop(tags);
                self.potential.remove_if(&rcid_hash, |_, t| t.is_empty());
            }
        }

        self.stats.write().groups_formed += 1;
        info!(
            "CMC 그룹 커밋: rcid={:08x}, tag={}, 멤버 {}개",
            rcid_hash,
            tag,
            admitted.len()
        );

        GroupResolution::Deliver(admitted)
    }

    /// 재시도 루프를 포함한 그룹 해석
    ///
    /// 시도 사이 200ms(설정값) 수면, 수면 중 테이블 락 없음.
    /// 소진 시 실패를 호출자에게 보고.
    pub async fn resolve_group_with_retry(
        &self,
        rcid: &ContentIdentifier,
        tag: CorrelationTag,
        session_key: SessionKey,
        is_first_packet: bool,
    ) -> Result<Vec<NodeId>> {
        let attempts = self.config.cmc_retry_attempts.max(1);
        let interval = Duration::from_millis(self.config.cmc_retry_interval_ms);

        for attempt in 0..attempts {
            match self.resolve_group(rcid, tag, session_key, is_first_packet) {
                GroupResolution::Deliver(members) => return Ok(members),
                GroupResolution::MustBuffer => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }

        warn!(
            "CMC 그룹 형성 실패: rcid={:08x}, tag={}, {}회 시도",
            rcid.hash32(),
            tag,
            attempts
        );
        Err(Error::GroupFormation {
            rcid: rcid.hash32(),
            attempts,
        })
    }

    /// 그룹 해체
    ///
    /// 모든 멤버에게 세션 종료 신호를 보내고 전원의 ack를 기다린 뒤
    /// locked 엔트리를 삭제하고 빈 부모 레벨을 정리.
    /// 대기에 타임아웃 없음: 닿지 않는 멤버는 이 해체 1건만 세움
    /// (공유 락은 잡지 않음)
    pub async fn close_group(
        &self,
        rcid: &ContentIdentifier,
        tag: CorrelationTag,
        session_key: SessionKey,
    ) -> Result<()> {
        let rcid_hash = rcid.hash32();

        let members: Vec<NodeId> = match self.locked.get(&rcid_hash) {
            Some(tags) => tags
                .get(&tag)
                .and_then(|keys| keys.get(&session_key))
                .cloned()
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if !members.is_empty() {
            let close_key: CloseKey = (rcid_hash, tag, session_key);
            {
                let mut pending = self.pending_closes.lock();
                pending.insert(close_key, members.iter().cloned().collect());
            }

            let signal = SessionEndSignal { tag, session_key };
            if let Err(e) =
                self.core
                    .publish_data_to_group(rcid, &members, Bytes::from(signal.to_bytes()))
            {
                self.pending_closes.lock().remove(&close_key);
                return Err(e);
            }

            debug!(
                "세션 종료 신호 발신: rcid={:08x}, tag={}, 멤버 {}개",
                rcid_hash,
                tag,
                members.len()
            );

            // 전원 ack 대기 (타임아웃 없음)
            loop {
                let notified = self.close_notify.notified();
                {
                    let pending = self.pending_closes.lock();
                    match pending.get(&close_key) {
                        Some(set) if !set.is_empty() => {}
                        _ => break,
                    }
                }
                notified.await;
            }

            self.pending_closes.lock().remove(&close_key);
        }

        // locked 엔트리 삭제 + 빈 부모 정리
        if let Some(mut tags) = self.locked.get_mut(&rcid_hash) {
            if let Some(keys) = tags.get_mut(&tag) {
                keys.remove(&session_key);
                if keys.is_empty() {
                    tags.remove(&tag);
                }
            }
            if tags.is_empty() {
                drop(tags);
                self.locked.remove_if(&rcid_hash, |_, t| t.is_empty());
            }
        }

        self.stats.write().groups_closed += 1;
        Ok(())
    }

    /// 멤버 1개의 해체 ack 기록
    ///
    /// session_key까지 일치해야 함: 같은 (rCID, tag)에 해체가 여러 건
    /// 진행 중일 때 ack 1개가 다른 해체에 넘어가면 안 됨
    pub fn confirm_close(
        &self,
        rcid: u32,
        tag: CorrelationTag,
        session_key: SessionKey,
        node: &str,
    ) {
        let close_key: CloseKey = (rcid, tag, session_key);
        let acked = {
            let mut pending = self.pending_closes.lock();
            pending
                .get_mut(&close_key)
                .map(|set| set.remove(node))
                .unwrap_or(false)
        };
        if acked {
            self.close_notify.notify_waiters();
        }
    }

    /// 활성(커밋된) 그룹 수
    ///
    /// 엔드포인트 전환 플로우가 진행 전 폴링하는 값
    pub fn active_group_count(&self) -> usize {
        self.locked
            .iter()
            .map(|tags| tags.values().map(|keys| keys.len()).sum::<usize>())
            .sum()
    }

    /// potential 레벨 존재 여부 (테스트용)
    pub fn has_potential(&self, rcid: u32, tag: CorrelationTag) -> bool {
        self.potential
            .get(&rcid)
            .map(|tags| tags.contains_key(&tag))
            .unwrap_or(false)
    }

    /// potential 멤버 수
    pub fn potential_member_count(&self, rcid: u32, tag: CorrelationTag) -> usize {
        self.potential
            .get(&rcid)
            .and_then(|tags| tags.get(&tag).map(|nodes| nodes.len()))
            .unwrap_or(0)
    }

    /// locked 레벨 존재 여부 (테스트용)
    pub fn has_locked_levels(&self, rcid: u32) -> bool {
        self.locked.contains_key(&rcid)
    }

    /// 오래된 potential 엔트리 스윕
    ///
    /// max_age가 0이면 아무것도 하지 않음
    pub fn sweep_potential(&self, max_age: Duration) {
        if max_age.is_zero() {
            return;
        }

        self.potential.retain(|_, tags| {
            tags.retain(|_, nodes| {
                nodes.retain(|_, member| member.announced_at.elapsed() <= max_age);
                !nodes.is_empty()
            });
            !tags.is_empty()
        });
    }
}
