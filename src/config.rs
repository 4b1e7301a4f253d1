//! 전송 계층 설정

use crate::{DEFAULT_PATH_MTU, FRAGMENT_HEADER_SIZE};

/// NAP 전송 계층 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 경로 MTU (바이트), 단편화 최대 페이로드 계산 입력
    pub path_mtu: usize,

    /// CMC 그룹 형성 재시도 횟수
    pub cmc_retry_attempts: u32,

    /// CMC 재시도 간격 (밀리초)
    pub cmc_retry_interval_ms: u64,

    /// 재조립 엔트리 최대 수명 (밀리초)
    /// 0이면 축출 없음
    pub reassembly_eviction_ms: u64,

    /// potential 그룹 엔트리 최대 수명 (밀리초)
    /// 0이면 축출 없음
    pub potential_group_eviction_ms: u64,

    /// 대기 패킷 버퍼 최대 수명 (밀리초)
    /// 0이면 축출 없음
    pub pending_buffer_eviction_ms: u64,

    /// 유지보수 스윕 주기 (밀리초)
    pub buffer_sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path_mtu: DEFAULT_PATH_MTU,
            cmc_retry_attempts: 5,
            cmc_retry_interval_ms: 200,       // 시도 간 200ms 수면
            reassembly_eviction_ms: 0,        // 축출 없음
            potential_group_eviction_ms: 0,   // 축출 없음
            pending_buffer_eviction_ms: 0,    // 축출 없음
            buffer_sweep_interval_ms: 1000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 손실 많은 코어망용 설정
    pub fn lossy_core() -> Self {
        Self {
            path_mtu: 1400,
            cmc_retry_attempts: 10,
            cmc_retry_interval_ms: 300,
            ..Self::default()
        }
    }

    /// 상태 상한 설정 (축출 활성화)
    ///
    /// 재조립/potential/대기 버퍼의 암묵적 누수를 막고 싶을 때
    pub fn bounded_state() -> Self {
        Self {
            reassembly_eviction_ms: 30_000,
            potential_group_eviction_ms: 60_000,
            pending_buffer_eviction_ms: 60_000,
            buffer_sweep_interval_ms: 1000,
            ..Self::default()
        }
    }

    /// 단편화 최대 페이로드 계산
    ///
    /// path_mtu - 식별자 길이 - 유닛 헤더.
    /// 헤더의 payload_len이 u16이라 65535 바이트가 상한
    pub fn max_fragment_payload(&self, identifier_overhead: usize) -> usize {
        self.path_mtu
            .saturating_sub(identifier_overhead)
            .saturating_sub(FRAGMENT_HEADER_SIZE)
            .min(u16::MAX as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_eviction() {
        let config = Config::default();
        assert_eq!(config.reassembly_eviction_ms, 0);
        assert_eq!(config.potential_group_eviction_ms, 0);
        assert_eq!(config.cmc_retry_interval_ms, 200);
    }

    #[test]
    fn test_max_fragment_payload() {
        let config = Config::default();
        assert_eq!(
            config.max_fragment_payload(16),
            DEFAULT_PATH_MTU - 16 - FRAGMENT_HEADER_SIZE
        );

        // 오버헤드가 MTU를 넘으면 0으로 포화
        assert_eq!(config.max_fragment_payload(DEFAULT_PATH_MTU + 1), 0);
    }

    #[test]
    fn test_max_fragment_payload_clamped_to_header_width() {
        let config = Config {
            path_mtu: 100_000,
            ..Config::default()
        };

        // 점보 MTU라도 payload_len 필드 폭을 넘지 않음
        assert_eq!(config.max_fragment_payload(16), u16::MAX as usize);
    }
}
