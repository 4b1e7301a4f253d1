//! 대기 패킷 버퍼
//!
//! 키당 슬롯 1개, last-write-wins. 새 제출이 이전 패킷을 소유권 이동으로
//! 교체하므로 수동 할당/해제 사이클이 없음. 큐잉 없음, 백프레셔 없음.

use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::identifier::ContentIdentifier;
use crate::{CorrelationTag, SessionKey};

/// 버퍼 키: (CID 해시, rCID 해시)
///
/// CID 단독 키는 rcid = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketKey {
    pub cid: u32,
    pub rcid: u32,
}

impl PacketKey {
    /// CID 단독 키
    pub fn of(cid: &ContentIdentifier) -> Self {
        Self {
            cid: cid.hash32(),
            rcid: 0,
        }
    }

    /// (CID, rCID) 키
    pub fn of_pair(cid: &ContentIdentifier, rcid: &ContentIdentifier) -> Self {
        Self {
            cid: cid.hash32(),
            rcid: rcid.hash32(),
        }
    }
}

/// 대기 중인 패킷 1개
#[derive(Debug, Clone)]
pub struct PendingPacket {
    /// 요청 식별자
    pub cid: ContentIdentifier,

    /// 응답 식별자 (HTTP 경로에서만)
    pub rcid: Option<ContentIdentifier>,

    /// 상관 태그
    pub tag: CorrelationTag,

    /// 로컬 세션 키
    pub session_key: SessionKey,

    /// HTTP 메서드 (HTTP 경로에서만)
    pub method: Option<String>,

    /// 페이로드
    pub payload: Bytes,

    /// 버퍼링 시각
    pub stored_at: Instant,
}

impl PendingPacket {
    /// 새 대기 패킷 생성
    pub fn new(
        cid: ContentIdentifier,
        rcid: Option<ContentIdentifier>,
        tag: CorrelationTag,
        session_key: SessionKey,
        method: Option<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            cid,
            rcid,
            tag,
            session_key,
            method,
            payload,
            stored_at: Instant::now(),
        }
    }

    /// 이 패킷의 버퍼 키
    pub fn key(&self) -> PacketKey {
        match &self.rcid {
            Some(rcid) => PacketKey::of_pair(&self.cid, rcid),
            None => PacketKey::of(&self.cid),
        }
    }
}

/// 대기 패킷 버퍼 (키당 1개, last-write-wins)
#[derive(Default)]
pub struct PendingPacketBuffer {
    slots: DashMap<PacketKey, PendingPacket>,
}

impl PendingPacketBuffer {
    /// 새 버퍼 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 패킷 삽입, 이전 패킷은 교체됨
    ///
    /// 반환값: 기존 엔트리를 덮어썼는지 여부
    pub fn insert(&self, packet: PendingPacket) -> bool {
        let key = packet.key();
        let replaced = self.slots.insert(key, packet).is_some();
        if replaced {
            debug!("대기 패킷 교체: cid={:08x}, rcid={:08x}", key.cid, key.rcid);
        }
        replaced
    }

    /// 패킷 꺼내기 (엔트리 제거)
    pub fn take(&self, key: &PacketKey) -> Option<PendingPacket> {
        self.slots.remove(key).map(|(_, packet)| packet)
    }

    /// CID 해시에 걸린 모든 패킷 꺼내기 (rCID 무관)
    pub fn take_all_for_cid(&self, cid: u32) -> Vec<PendingPacket> {
        let keys: Vec<PacketKey> = self
            .slots
            .iter()
            .filter(|entry| entry.key().cid == cid)
            .map(|entry| *entry.key())
            .collect();

        keys.iter()
            .filter_map(|key| self.slots.remove(key).map(|(_, packet)| packet))
            .collect()
    }

    /// (rCID, tag, session_key)에 매칭되는 패킷 삭제
    ///
    /// 세션 종료 시 호출
    pub fn remove_matching(&self, rcid: u32, tag: CorrelationTag, session_key: SessionKey) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, packet| {
            !(key.rcid == rcid && packet.tag == tag && packet.session_key == session_key)
        });
        before - self.slots.len()
    }

    /// 오래된 엔트리 스윕
    ///
    /// max_age가 0이면 아무것도 하지 않음
    pub fn sweep(&self, max_age: Duration) {
        if max_age.is_zero() {
            return;
        }

        let before = self.slots.len();
        self.slots.retain(|_, packet| packet.stored_at.elapsed() <= max_age);
        let evicted = before - self.slots.len();
        if evicted > 0 {
            debug!("대기 패킷 {}개 축출", evicted);
        }
    }

    /// 버퍼 크기
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Namespace;

    fn packet(payload: &[u8]) -> PendingPacket {
        let cid = ContentIdentifier::new(Namespace::Http);
        let rcid = ContentIdentifier::response("example.com", "/");
        PendingPacket::new(
            cid,
            Some(rcid),
            7,
            3,
            Some("GET".into()),
            Bytes::copy_from_slice(payload),
        )
    }

    #[test]
    fn test_last_write_wins() {
        let buffer = PendingPacketBuffer::new();

        let first = packet(b"first");
        let key = first.key();

        assert!(!buffer.insert(first));
        assert!(buffer.insert(packet(b"second")));
        assert_eq!(buffer.len(), 1);

        let survivor = buffer.take(&key).unwrap();
        assert_eq!(survivor.payload.as_ref(), b"second");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_remove_matching() {
        let buffer = PendingPacketBuffer::new();
        let p = packet(b"data");
        let rcid = p.rcid.as_ref().unwrap().hash32();
        buffer.insert(p);

        // 태그 불일치면 남김
        assert_eq!(buffer.remove_matching(rcid, 99, 3), 0);
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.remove_matching(rcid, 7, 3), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sweep_zero_is_noop() {
        let buffer = PendingPacketBuffer::new();
        buffer.insert(packet(b"data"));

        buffer.sweep(Duration::ZERO);
        assert_eq!(buffer.len(), 1);

        // 충분히 큰 수명도 남김
        buffer.sweep(Duration::from_secs(3600));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_take_all_for_cid() {
        let buffer = PendingPacketBuffer::new();
        let p = packet(b"data");
        let cid_hash = p.cid.hash32();
        buffer.insert(p);

        let drained = buffer.take_all_for_cid(cid_hash);
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.take_all_for_cid(cid_hash).is_empty());
    }
}
