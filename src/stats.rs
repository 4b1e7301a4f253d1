//! 전송 계층 통계

use std::time::Instant;

/// NAP 전송 계층 카운터 스냅샷
#[derive(Debug, Clone)]
pub struct NapStats {
    /// 버퍼링된 패킷 수
    pub buffered_packets: u64,

    /// last-write-wins로 덮어쓴 패킷 수
    pub overwritten_packets: u64,

    /// START_PUBLISH로 플러시된 패킷 수
    pub flushed_packets: u64,

    /// 가용성 광고 (publish_info) 횟수
    pub advertisements: u64,

    /// 직접 발행 (forwarding 상태) 횟수
    pub direct_publishes: u64,

    /// 형성된 CMC 그룹 수
    pub groups_formed: u64,

    /// all-or-nothing 실패로 포기한 형성 시도 수
    pub groups_abandoned: u64,

    /// 해체된 그룹 수
    pub groups_closed: u64,

    /// 전송한 단편화 유닛 수
    pub fragments_sent: u64,

    /// 재조립 완료 메시지 수
    pub messages_reassembled: u64,

    /// 등록된 세션 수 (누적)
    pub sessions_registered: u64,

    /// 제거된 세션 키 수 (누적)
    pub sessions_removed: u64,

    /// 라우팅 미스 (드롭) 수
    pub routing_misses: u64,

    /// 측정 시작 시각
    pub started_at: Instant,
}

impl Default for NapStats {
    fn default() -> Self {
        Self {
            buffered_packets: 0,
            overwritten_packets: 0,
            flushed_packets: 0,
            advertisements: 0,
            direct_publishes: 0,
            groups_formed: 0,
            groups_abandoned: 0,
            groups_closed: 0,
            fragments_sent: 0,
            messages_reassembled: 0,
            sessions_registered: 0,
            sessions_removed: 0,
            routing_misses: 0,
            started_at: Instant::now(),
        }
    }
}

impl NapStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 가동 시간 (초)
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
