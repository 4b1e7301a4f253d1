//! Forwarding-State Gate
//!
//! CID별 publish/buffer 결정. 전달 경로가 준비되기 전에는 패킷을
//! last-write-wins 버퍼에 쌓고 가용성 광고는 동시에 1건만 유지.
//! START_PUBLISH 신호가 오면 버퍼를 직접 발행으로 플러시.
//!
//! 상태 전이: UNKNOWN → ADVERTISED_PENDING → FORWARDING → (철회 시)
//! ADVERTISED_PENDING, 임의 상태 → PAUSED (엔드포인트 전환 중)

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::buffer::{PendingPacket, PendingPacketBuffer};
use crate::error::{Error, Result};
use crate::identifier::ContentIdentifier;
use crate::routing::RoutingCore;
use crate::stats::NapStats;

/// CID별 전달 상태 레코드
///
/// 불변식: fid_requested는 forwarding이 false인 동안만 true
#[derive(Debug, Clone)]
pub struct ForwardingRecord {
    /// 전달 경로 준비 여부
    pub forwarding: bool,

    /// 광고가 진행 중인지 (응답 대기)
    pub fid_requested: bool,

    /// 일시정지 여부 (엔드포인트 전환 중)
    pub pausing: bool,

    /// 마지막 접근 시각
    pub last_accessed: Instant,
}

impl ForwardingRecord {
    fn new() -> Self {
        Self {
            forwarding: false,
            fid_requested: false,
            pausing: false,
            last_accessed: Instant::now(),
        }
    }
}

/// submit 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 버퍼링 + 광고 발신
    Advertised,

    /// 버퍼링만 (광고는 이미 진행 중)
    Buffered,

    /// forwarding 상태라 직접 발행됨
    Published,
}

/// Forwarding-State Gate
pub struct ForwardingGate {
    records: DashMap<u32, ForwardingRecord>,
    buffer: Arc<PendingPacketBuffer>,
    core: Arc<dyn RoutingCore>,
    stats: Arc<RwLock<NapStats>>,
}

impl ForwardingGate {
    /// 새 게이트 생성
    pub fn new(
        buffer: Arc<PendingPacketBuffer>,
        core: Arc<dyn RoutingCore>,
        stats: Arc<RwLock<NapStats>>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            buffer,
            core,
            stats,
        }
    }

    /// 패킷 제출
    ///
    /// - 미등록 CID: 레코드 생성, 버퍼링, 광고
    /// - 미전달 + 광고 진행 중: 버퍼 덮어쓰기만 (재광고 없음)
    /// - 미전달 + 광고 없음: 버퍼링, 광고
    /// - 전달 중: 버퍼링 없이 직접 발행
    /// - 일시정지: 거부
    pub fn submit(&self, packet: PendingPacket) -> Result<SubmitOutcome> {
        let cid = packet.cid.clone();
        let hash = cid.hash32();

        let mut record = self.records.entry(hash).or_insert_with(ForwardingRecord::new);
        record.last_accessed = Instant::now();

        if record.pausing {
            debug!("일시정지 상태 제출 거부: cid={:08x}", hash);
            return Err(Error::IdentifierPaused);
        }

        if record.forwarding {
            // 버퍼링 없이 그대로 통과
            let payload = packet.payload;
            drop(record);
            self.core.publish_data(&cid, payload)?;
            self.stats.write().direct_publishes += 1;
            return Ok(SubmitOutcome::Published);
        }

        let overwritten = self.buffer.insert(packet);
        {
            let mut stats = self.stats.write();
            stats.buffered_packets += 1;
            if overwritten {
                stats.overwritten_packets += 1;
            }
        }

        if record.fid_requested {
            // 광고는 동시에 1건만
            return Ok(SubmitOutcome::Buffered);
        }

        record.fid_requested = true;
        drop(record);

        self.core.publish_info(&cid)?;
        self.stats.write().advertisements += 1;
        debug!("가용성 광고: cid={:08x}", hash);

        Ok(SubmitOutcome::Advertised)
    }

    /// START_PUBLISH 수신: forwarding 시작, 버퍼 플러시
    pub fn on_start_publish(&self, cid: &ContentIdentifier) {
        let hash = cid.hash32();

        {
            let mut record = self.records.entry(hash).or_insert_with(ForwardingRecord::new);
            record.forwarding = true;
            record.fid_requested = false; // forwarding이 되는 즉시 해제
            record.last_accessed = Instant::now();
        }

        // 락을 놓은 뒤 플러시 (publish_data는 블로킹 가능)
        let pending = self.buffer.take_all_for_cid(hash);
        if pending.is_empty() {
            return;
        }

        info!("전달 경로 준비: cid={:08x}, 대기 패킷 {}개 플러시", hash, pending.len());
        for packet in pending {
            if let Err(e) = self.core.publish_data(cid, packet.payload) {
                warn!("플러시 발행 실패: cid={:08x}, {}", hash, e);
                continue;
            }
            let mut stats = self.stats.write();
            stats.flushed_packets += 1;
            stats.direct_publishes += 1;
        }
    }

    /// STOP_PUBLISH 수신: forwarding 해제, 다음 제출에서 재광고
    pub fn on_stop_publish(&self, cid: &ContentIdentifier) {
        let hash = cid.hash32();
        if let Some(mut record) = self.records.get_mut(&hash) {
            record.forwarding = false;
            record.fid_requested = false;
            record.last_accessed = Instant::now();
            debug!("전달 경로 철회: cid={:08x}", hash);
        }
    }

    /// 발행 일시정지 (엔드포인트 전환 시작)
    pub fn pause(&self, cid: &ContentIdentifier) {
        let mut record = self
            .records
            .entry(cid.hash32())
            .or_insert_with(ForwardingRecord::new);
        record.pausing = true;
        record.last_accessed = Instant::now();
    }

    /// 발행 재개
    pub fn resume(&self, cid: &ContentIdentifier) {
        if let Some(mut record) = self.records.get_mut(&cid.hash32()) {
            record.pausing = false;
            record.last_accessed = Instant::now();
        }
    }

    /// 명시적 철회: 레코드 삭제 + unpublish_info
    ///
    /// 프로세스 수명 중 레코드가 사라지는 유일한 경로
    pub fn unpublish(&self, cid: &ContentIdentifier) -> Result<()> {
        self.records.remove(&cid.hash32());
        self.core.unpublish_info(cid)
    }

    /// forwarding 상태 조회
    pub fn is_forwarding(&self, cid: &ContentIdentifier) -> bool {
        self.records
            .get(&cid.hash32())
            .map(|r| r.forwarding)
            .unwrap_or(false)
    }

    /// 레코드 수
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
