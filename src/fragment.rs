//! 단편화 / 재조립 ("unreliable transport")
//!
//! IP 경로용 베스트에포트 전송. 유닛 하나라도 유실되면 해당 키의
//! 재조립은 영구히 멈춤 (ack 없음, 재전송 없음) — 호출자는 새 키로
//! 재전송해야 함. 키 간 순서 보장 없음, 키 내에서는 연속 구간만 전달.
//!
//! 유닛 와이어 레이아웃 (리틀엔디언, 이 크레이트가 소유):
//! key(u32) | state(u8) | sequence(u8) | payload_len(u16) | payload

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifier::ContentIdentifier;
use crate::routing::RoutingCore;
use crate::stats::NapStats;
use crate::FRAGMENT_HEADER_SIZE;

/// 유닛 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FragmentState {
    /// 단일 유닛 메시지
    Single = 0,

    /// 단편 시작 (sequence 1)
    Start = 1,

    /// 중간 단편
    Fragment = 2,

    /// 마지막 단편
    Finished = 3,
}

impl FragmentState {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FragmentState::Single),
            1 => Some(FragmentState::Start),
            2 => Some(FragmentState::Fragment),
            3 => Some(FragmentState::Finished),
            _ => None,
        }
    }
}

/// 단편화 유닛 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// 한 논리 메시지의 유닛들을 묶는 랜덤 키
    pub key: u32,

    /// 유닛 상태
    pub state: FragmentState,

    /// 시퀀스 번호 (1부터 시작)
    pub sequence: u8,

    /// 페이로드 길이
    pub payload_len: u16,
}

impl FragmentHeader {
    /// 헤더 직렬화 (8바이트 고정)
    pub fn to_bytes(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut buf = [0u8; FRAGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.key.to_le_bytes());
        buf[4] = self.state as u8;
        buf[5] = self.sequence;
        buf[6..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// 바이트에서 헤더 파싱
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAGMENT_HEADER_SIZE {
            return Err(Error::InvalidFragmentHeader { len: bytes.len() });
        }

        let key = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let state = FragmentState::from_u8(bytes[4])
            .ok_or(Error::InvalidFragmentHeader { len: bytes.len() })?;
        let sequence = bytes[5];
        let payload_len = u16::from_le_bytes([bytes[6], bytes[7]]);

        Ok(Self {
            key,
            state,
            sequence,
            payload_len,
        })
    }
}

/// 재조립 싱크 (IP 소켓 협력자)
pub trait PacketSink: Send + Sync {
    /// 재조립 완료 페이로드 전달, 성공 여부 반환
    fn send_packet(&self, bytes: &[u8]) -> bool;
}

/// 수신 유닛 1개
#[derive(Debug)]
struct StoredUnit {
    state: FragmentState,
    payload: Bytes,
}

/// 키 1개의 재조립 상태
#[derive(Debug)]
struct ReassemblyEntry {
    /// 시퀀스 → 유닛 (순서 저장, 재정렬 없음)
    units: BTreeMap<u8, StoredUnit>,

    /// 첫 유닛 도착 시각 (축출 정책용)
    created_at: Instant,
}

impl ReassemblyEntry {
    fn new() -> Self {
        Self {
            units: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    /// 완결 검사: 시퀀스 1이 START, 연속 구간, 마지막이 FINISHED
    fn is_complete(&self) -> bool {
        let mut expected = 1u8;
        let mut finished = false;

        for (&seq, unit) in &self.units {
            if seq != expected {
                return false; // 갭
            }
            match unit.state {
                FragmentState::Start if seq == 1 => {}
                FragmentState::Fragment if seq > 1 => {}
                FragmentState::Finished if seq > 1 => {
                    finished = true;
                    break;
                }
                _ => return false,
            }
            expected = expected.wrapping_add(1);
        }

        finished && self.units.first_key_value().map(|(&s, _)| s) == Some(1)
    }

    /// 순서대로 페이로드 연결
    fn assemble(&self) -> Bytes {
        let total: usize = self.units.values().map(|u| u.payload.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for unit in self.units.values() {
            out.extend_from_slice(&unit.payload);
            if unit.state == FragmentState::Finished {
                break;
            }
        }
        out.freeze()
    }
}

/// 단편화/재조립 엔진
pub struct UnreliableTransport {
    entries: DashMap<u32, ReassemblyEntry>,
    config: Config,
    core: Arc<dyn RoutingCore>,
    sink: Arc<dyn PacketSink>,
    stats: Arc<RwLock<NapStats>>,
}

impl UnreliableTransport {
    /// 새 엔진 생성
    pub fn new(
        config: Config,
        core: Arc<dyn RoutingCore>,
        sink: Arc<dyn PacketSink>,
        stats: Arc<RwLock<NapStats>>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            core,
            sink,
            stats,
        }
    }

    /// 데이터 발행
    ///
    /// MTU에 맞으면 SINGLE 1개, 아니면 START/FRAGMENT.../FINISHED로 분할.
    /// 각 유닛은 즉시 독립적으로 발행 (배칭 없음, 흐름 제어 없음)
    pub fn publish(&self, identifier: &ContentIdentifier, data: &[u8]) -> Result<()> {
        let max_payload = self.config.max_fragment_payload(identifier.wire_len());
        if max_payload == 0 {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: 0,
            });
        }

        let key: u32 = rand::random();

        if data.len() <= max_payload {
            self.emit(identifier, key, FragmentState::Single, 1, data)?;
            return Ok(());
        }

        // 시퀀스는 u8이라 유닛 수 상한 255개
        let unit_count = (data.len() + max_payload - 1) / max_payload;
        if unit_count > u8::MAX as usize {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: max_payload * u8::MAX as usize,
            });
        }

        let mut sequence = 1u8;
        for (idx, chunk) in data.chunks(max_payload).enumerate() {
            let state = if idx == 0 {
                FragmentState::Start
            } else if idx == unit_count - 1 {
                FragmentState::Finished
            } else {
                FragmentState::Fragment
            };
            self.emit(identifier, key, state, sequence, chunk)?;
            sequence = sequence.wrapping_add(1);
        }

        debug!(
            "단편화 발행: key={:08x}, {}개 유닛, {}바이트",
            key,
            unit_count,
            data.len()
        );
        Ok(())
    }

    fn emit(
        &self,
        identifier: &ContentIdentifier,
        key: u32,
        state: FragmentState,
        sequence: u8,
        payload: &[u8],
    ) -> Result<()> {
        let header = FragmentHeader {
            key,
            state,
            sequence,
            payload_len: payload.len() as u16,
        };

        let mut unit = BytesMut::with_capacity(FRAGMENT_HEADER_SIZE + payload.len());
        unit.extend_from_slice(&header.to_bytes());
        unit.extend_from_slice(payload);

        self.core.publish_data(identifier, unit.freeze())?;
        self.stats.write().fragments_sent += 1;
        Ok(())
    }

    /// 유닛 수신 처리
    ///
    /// SINGLE은 즉시 싱크로. 나머지는 키별 엔트리에 삽입 후 연속 구간
    /// 검사, 완결 시 순서대로 연결해 싱크로 전달하고 엔트리 축출
    pub fn handle(&self, _identifier: &ContentIdentifier, unit: &[u8]) -> Result<()> {
        let header = FragmentHeader::from_bytes(unit)?;
        let payload_end = FRAGMENT_HEADER_SIZE + header.payload_len as usize;
        if unit.len() < payload_end {
            return Err(Error::InvalidFragmentHeader { len: unit.len() });
        }
        let payload = Bytes::copy_from_slice(&unit[FRAGMENT_HEADER_SIZE..payload_end]);

        if header.state == FragmentState::Single {
            if !self.sink.send_packet(&payload) {
                warn!("싱크 전달 실패: key={:08x}", header.key);
            }
            self.stats.write().messages_reassembled += 1;
            return Ok(());
        }

        let complete = {
            let mut entry = self
                .entries
                .entry(header.key)
                .or_insert_with(ReassemblyEntry::new);

            // 중복 시퀀스는 최초 도착 유지
            entry.units.entry(header.sequence).or_insert(StoredUnit {
                state: header.state,
                payload,
            });

            entry.is_complete()
        };

        if complete {
            if let Some((_, entry)) = self.entries.remove(&header.key) {
                let assembled = entry.assemble();
                debug!(
                    "재조립 완료: key={:08x}, {}바이트",
                    header.key,
                    assembled.len()
                );
                if !self.sink.send_packet(&assembled) {
                    warn!("싱크 전달 실패: key={:08x}", header.key);
                }
                self.stats.write().messages_reassembled += 1;
            }
        }

        Ok(())
    }

    /// 진행 중 재조립 엔트리 수
    pub fn pending_entries(&self) -> usize {
        self.entries.len()
    }

    /// 오래된 재조립 엔트리 스윕
    ///
    /// max_age가 0이면 아무것도 하지 않음
    pub fn sweep(&self, max_age: Duration) {
        if max_age.is_zero() {
            return;
        }

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() <= max_age);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("재조립 엔트리 {}개 축출", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Namespace;
    use crate::routing::testing::{CoreCall, RecordingCore};
    use parking_lot::Mutex;

    /// 전달된 패킷을 기록하는 모의 싱크
    #[derive(Default)]
    struct MockSink {
        packets: Mutex<Vec<Vec<u8>>>,
    }

    impl PacketSink for MockSink {
        fn send_packet(&self, bytes: &[u8]) -> bool {
            self.packets.lock().push(bytes.to_vec());
            true
        }
    }

    fn transport() -> (UnreliableTransport, Arc<RecordingCore>, Arc<MockSink>) {
        let core = Arc::new(RecordingCore::new());
        let sink = Arc::new(MockSink::default());
        let stats = Arc::new(RwLock::new(NapStats::new()));
        let t = UnreliableTransport::new(Config::default(), core.clone(), sink.clone(), stats);
        (t, core, sink)
    }

    fn ip_cid() -> ContentIdentifier {
        let mut cid = ContentIdentifier::new(Namespace::Ip);
        cid.push_segment(0x0a000001);
        cid
    }

    /// 발행된 유닛들을 코어 기록에서 회수
    fn published_units(core: &RecordingCore) -> Vec<Vec<u8>> {
        core.calls()
            .into_iter()
            .filter_map(|c| match c {
                CoreCall::PublishData(_, data) => Some(data),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FragmentHeader {
            key: 0xdeadbeef,
            state: FragmentState::Fragment,
            sequence: 7,
            payload_len: 1200,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), FRAGMENT_HEADER_SIZE);
        assert_eq!(FragmentHeader::from_bytes(&bytes).unwrap(), header);

        assert!(FragmentHeader::from_bytes(&bytes[..7]).is_err());
        let mut bad_state = bytes;
        bad_state[4] = 9;
        assert!(FragmentHeader::from_bytes(&bad_state).is_err());
    }

    #[test]
    fn test_roundtrip_boundary_sizes() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());

        for size in [0usize, 1, max - 1, max, max + 1, 10 * max] {
            let (tx, core, _) = transport();
            let (rx, _, sink) = transport();

            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            tx.publish(&cid, &data).unwrap();

            let units = published_units(&core);
            if size <= max {
                assert_eq!(units.len(), 1, "size={}", size);
            } else {
                assert!(units.len() >= 2, "size={}", size);
            }

            for unit in &units {
                rx.handle(&cid, unit).unwrap();
            }

            let packets = sink.packets.lock();
            assert_eq!(packets.len(), 1, "size={}", size);
            assert_eq!(packets[0], data, "size={}", size);
            assert_eq!(rx.pending_entries(), 0);
        }
    }

    #[test]
    fn test_shuffled_fragments_reassemble() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());
        let data: Vec<u8> = (0..5 * max).map(|i| (i % 199) as u8).collect();

        let (tx, core, _) = transport();
        let (rx, _, sink) = transport();
        tx.publish(&cid, &data).unwrap();

        let mut units = published_units(&core);
        // START 먼저, FINISHED 마지막, 중간은 역순으로 섞음
        let finished = units.pop().unwrap();
        let start = units.remove(0);
        units.reverse();

        rx.handle(&cid, &start).unwrap();
        for unit in &units {
            rx.handle(&cid, unit).unwrap();
            // 갭이 있는 동안은 전달 없음
        }
        assert!(sink.packets.lock().is_empty());

        rx.handle(&cid, &finished).unwrap();
        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0], data);
    }

    #[test]
    fn test_dropped_unit_never_delivers() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());
        let data: Vec<u8> = vec![0xab; 4 * max];

        for drop_idx in 0..4 {
            let (tx, core, _) = transport();
            let (rx, _, sink) = transport();
            tx.publish(&cid, &data).unwrap();

            let units = published_units(&core);
            assert_eq!(units.len(), 4);

            for (idx, unit) in units.iter().enumerate() {
                if idx != drop_idx {
                    rx.handle(&cid, unit).unwrap();
                }
            }

            // 어느 유닛이 빠져도 전달은 영원히 없음
            assert!(sink.packets.lock().is_empty(), "drop_idx={}", drop_idx);
            assert_eq!(rx.pending_entries(), 1);
        }
    }

    #[test]
    fn test_duplicate_unit_keeps_first() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());
        let data: Vec<u8> = vec![0x11; 2 * max];

        let (tx, core, _) = transport();
        let (rx, _, sink) = transport();
        tx.publish(&cid, &data).unwrap();

        let units = published_units(&core);
        rx.handle(&cid, &units[0]).unwrap();
        rx.handle(&cid, &units[0]).unwrap();
        rx.handle(&cid, &units[1]).unwrap();

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0], data);
    }

    #[test]
    fn test_keys_are_independent() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());

        let (tx, core, _) = transport();
        let (rx, _, sink) = transport();

        let a: Vec<u8> = vec![0x01; 2 * max];
        let b: Vec<u8> = vec![0x02; 2 * max];
        tx.publish(&cid, &a).unwrap();
        tx.publish(&cid, &b).unwrap();

        // 두 키의 유닛이 뒤섞여 도착해도 키별로 독립 조립
        let units = published_units(&core);
        assert_eq!(units.len(), 4);
        rx.handle(&cid, &units[0]).unwrap();
        rx.handle(&cid, &units[2]).unwrap();
        rx.handle(&cid, &units[3]).unwrap();
        rx.handle(&cid, &units[1]).unwrap();

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 2);
        assert!(packets.contains(&a));
        assert!(packets.contains(&b));
    }

    #[test]
    fn test_sweep_default_off() {
        let cid = ip_cid();
        let max = Config::default().max_fragment_payload(cid.wire_len());
        let data: Vec<u8> = vec![0xcd; 2 * max];

        let (tx, core, _) = transport();
        let (rx, _, _) = transport();
        tx.publish(&cid, &data).unwrap();

        let units = published_units(&core);
        rx.handle(&cid, &units[0]).unwrap();
        assert_eq!(rx.pending_entries(), 1);

        rx.sweep(Duration::ZERO);
        assert_eq!(rx.pending_entries(), 1);

        rx.sweep(Duration::from_nanos(1));
        assert_eq!(rx.pending_entries(), 0);
    }
}
