//! 세션 멀티플렉서
//!
//! (rCID, tag) → 로컬 소켓 세션 키 버킷 매핑과
//! 원격 노드 → 대기 rCID 역방향 인덱스 관리.
//! 인바운드 데이터는 가장 최근 등록된 세션 1개로만 기록 (알려진 단순화).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::buffer::PendingPacketBuffer;
use crate::stats::NapStats;
use crate::{CorrelationTag, NodeId, SessionKey, INVALID_SESSION_KEY};

/// 로컬 소켓 쓰기 경로 (IP/TCP 프록시가 구현)
pub trait SessionSink: Send + Sync {
    /// 세션에 바이트 쓰기, 쓴 바이트 수 반환
    fn write(&self, session: SessionKey, data: &[u8]) -> std::io::Result<usize>;

    /// 쓰기 방향만 닫기 (드레인 허용)
    fn half_close(&self, session: SessionKey) -> std::io::Result<()>;
}

/// 세션 멀티플렉서
pub struct SessionMultiplexer {
    /// rCID 해시 → tag → 세션 키 목록
    sessions: DashMap<u32, HashMap<CorrelationTag, Vec<SessionKey>>>,

    /// 원격 노드 → 그 노드가 기다리는 rCID 해시 목록 (역방향 인덱스)
    awaited: DashMap<NodeId, Vec<u32>>,

    sink: Arc<dyn SessionSink>,
    buffer: Arc<PendingPacketBuffer>,
    stats: Arc<RwLock<NapStats>>,
}

impl SessionMultiplexer {
    /// 새 멀티플렉서 생성
    pub fn new(
        sink: Arc<dyn SessionSink>,
        buffer: Arc<PendingPacketBuffer>,
        stats: Arc<RwLock<NapStats>>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            awaited: DashMap::new(),
            sink,
            buffer,
            stats,
        }
    }

    /// 세션 등록 (멱등: 버킷 내 중복 키 없음)
    pub fn register_session(&self, rcid: u32, tag: CorrelationTag, key: SessionKey) {
        let mut entry = self.sessions.entry(rcid).or_default();
        let bucket = entry.entry(tag).or_default();
        if !bucket.contains(&key) {
            bucket.push(key);
            self.stats.write().sessions_registered += 1;
            debug!("세션 등록: rcid={:08x}, tag={}, key={}", rcid, tag, key);
        }
    }

    /// 인바운드 데이터 라우팅
    ///
    /// 엔트리 없음 ⇒ 경고 후 드롭 (false).
    /// 있음 ⇒ 가장 최근 등록된 세션 1개에 기록, EINTR 재시도,
    /// 하드 에러면 중단하고 해당 엔트리 정리.
    pub fn route_inbound(&self, rcid: u32, tag: CorrelationTag, payload: &[u8]) -> bool {
        let target = {
            let entry = match self.sessions.get(&rcid) {
                Some(e) => e,
                None => {
                    warn!("라우팅 미스: rcid={:08x}, tag={}", rcid, tag);
                    self.stats.write().routing_misses += 1;
                    return false;
                }
            };
            match entry.get(&tag).and_then(|bucket| bucket.last().copied()) {
                Some(key) => key,
                None => {
                    warn!("라우팅 미스: rcid={:08x}, tag={} (태그 버킷 없음)", rcid, tag);
                    self.stats.write().routing_misses += 1;
                    return false;
                }
            }
        };

        // 락을 놓은 뒤 쓰기 루프
        let mut written = 0;
        while written < payload.len() {
            match self.sink.write(target, &payload[written..]) {
                Ok(0) => {
                    warn!("세션 쓰기 0바이트: key={}", target);
                    self.tear_down(rcid, tag);
                    return false;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("세션 쓰기 실패: key={}, {}", target, e);
                    self.tear_down(rcid, tag);
                    return false;
                }
            }
        }

        true
    }

    /// 쓰기 실패 세션 정리 (half-close 없이 엔트리만 제거)
    fn tear_down(&self, rcid: u32, tag: CorrelationTag) {
        if let Some(mut entry) = self.sessions.get_mut(&rcid) {
            if let Some(removed) = entry.remove(&tag) {
                self.stats.write().sessions_removed += removed.len() as u64;
            }
            if entry.is_empty() {
                drop(entry);
                self.sessions.remove_if(&rcid, |_, map| map.is_empty());
            }
        }
    }

    /// 세션 종료
    ///
    /// 엔트리 아래 모든 세션을 half-close하고 엔트리를 제거,
    /// 매칭되는 대기 패킷도 삭제
    pub fn end_session(&self, rcid: u32, tag: CorrelationTag) {
        let keys = {
            match self.sessions.get_mut(&rcid) {
                Some(mut entry) => {
                    let keys = entry.remove(&tag).unwrap_or_default();
                    if entry.is_empty() {
                        drop(entry);
                        self.sessions.remove_if(&rcid, |_, map| map.is_empty());
                    }
                    keys
                }
                None => Vec::new(),
            }
        };

        for key in &keys {
            if let Err(e) = self.sink.half_close(*key) {
                warn!("half-close 실패: key={}, {}", key, e);
            }
            self.buffer.remove_matching(rcid, tag, *key);
        }

        if !keys.is_empty() {
            self.stats.write().sessions_removed += keys.len() as u64;
            debug!("세션 종료: rcid={:08x}, tag={}, {}개", rcid, tag, keys.len());
        }
    }

    /// 세션 키 전면 삭제
    ///
    /// 로컬 소켓 닫힘이 rCID 범위 신호와 무관하게 감지됐을 때.
    /// 센티널 값(INVALID_SESSION_KEY)도 함께 청소하고 빈 버킷/레벨을 정리.
    pub fn delete_session_key(&self, key: SessionKey) {
        let mut removed = 0u64;

        self.sessions.retain(|_, tags| {
            tags.retain(|_, bucket| {
                let before = bucket.len();
                bucket.retain(|&k| k != key && k != INVALID_SESSION_KEY);
                removed += (before - bucket.len()) as u64;
                !bucket.is_empty()
            });
            !tags.is_empty()
        });

        if removed > 0 {
            self.stats.write().sessions_removed += removed;
            debug!("세션 키 전면 삭제: key={}, {}개 제거", key, removed);
        }
    }

    /// 노드가 rCID 응답을 기다리는 중임을 기록
    pub fn node_awaits(&self, node: &str, rcid: u32) {
        let mut list = self.awaited.entry(node.to_string()).or_default();
        if !list.contains(&rcid) {
            list.push(rcid);
        }
    }

    /// 노드의 대기 rCID 전부 꺼내기 (라우팅 가능 신호에 의한 재시도용)
    pub fn take_awaited(&self, node: &str) -> Vec<u32> {
        self.awaited
            .remove(node)
            .map(|(_, list)| list)
            .unwrap_or_default()
    }

    /// 특정 (노드, rCID) 대기 기록 삭제
    pub fn forget_awaited(&self, node: &str, rcid: u32) {
        if let Some(mut list) = self.awaited.get_mut(node) {
            list.retain(|&r| r != rcid);
            if list.is_empty() {
                drop(list);
                self.awaited.remove_if(node, |_, l| l.is_empty());
            }
        }
    }

    /// (rCID, tag) 버킷 길이 (테스트/통계용)
    pub fn bucket_len(&self, rcid: u32, tag: CorrelationTag) -> usize {
        self.sessions
            .get(&rcid)
            .and_then(|tags| tags.get(&tag).map(|b| b.len()))
            .unwrap_or(0)
    }

    /// 등록된 rCID 수
    pub fn rcid_count(&self) -> usize {
        self.sessions.len()
    }
}
