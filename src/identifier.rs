//! 콘텐츠 식별자 (CID / rCID)
//!
//! - CID: 고정폭 16진수 세그먼트의 계층 경로, 세그먼트 0은 루트 네임스페이스
//! - rCID: 엔드포인트 이름 + 리소스 경로를 해싱해 유도한 응답용 CID
//! - 핫패스 맵 키는 항상 전체 문자열의 32비트 해시 (문자열 키 금지)

use std::fmt;

use crate::SEGMENT_HEX_WIDTH;

/// 루트 네임스페이스
///
/// 세그먼트 0의 숫자 값으로 인코딩됨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// IP 핸드오버 경로 (unreliable transport)
    Ip,

    /// HTTP 요청/응답 경로 (CMC 전송)
    Http,

    /// 관리/제어 메시지
    Management,

    /// 멀티캐스트 (IGMP) 경로
    Multicast,

    /// 알 수 없는 루트
    Unknown(u64),
}

impl Namespace {
    /// 네임스페이스 숫자 값
    pub fn value(&self) -> u64 {
        match self {
            Namespace::Ip => 0,
            Namespace::Http => 1,
            Namespace::Management => 2,
            Namespace::Multicast => 3,
            Namespace::Unknown(v) => *v,
        }
    }

    /// 숫자 값에서 네임스페이스로
    pub fn from_value(value: u64) -> Self {
        match value {
            0 => Namespace::Ip,
            1 => Namespace::Http,
            2 => Namespace::Management,
            3 => Namespace::Multicast,
            v => Namespace::Unknown(v),
        }
    }

    /// 루트 세그먼트 문자열 (16자리 hex)
    pub fn segment(&self) -> String {
        format!("{:016x}", self.value())
    }
}

/// 콘텐츠 식별자
///
/// 전체 길이는 항상 세그먼트 폭의 배수
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdentifier {
    segments: Vec<String>,
}

impl ContentIdentifier {
    /// 루트 네임스페이스만 가진 식별자 생성
    pub fn new(root: Namespace) -> Self {
        Self {
            segments: vec![root.segment()],
        }
    }

    /// 빈 식별자 (맵 키로는 사용 불가, 계약 위반 검사용)
    pub fn empty() -> Self {
        Self { segments: Vec::new() }
    }

    /// hex 문자열에서 파싱
    ///
    /// 길이가 세그먼트 폭의 배수가 아니거나 hex가 아니면 None
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() % SEGMENT_HEX_WIDTH != 0 {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        let segments = s
            .as_bytes()
            .chunks(SEGMENT_HEX_WIDTH)
            .map(|chunk| String::from_utf8_lossy(chunk).to_lowercase())
            .collect();

        Some(Self { segments })
    }

    /// 응답 식별자 (rCID) 유도
    ///
    /// HTTP 루트 + crc32(fqdn) ++ crc32(resource) 세그먼트
    pub fn response(fqdn: &str, resource: &str) -> Self {
        let derived = format!(
            "{:08x}{:08x}",
            crc32fast::hash(fqdn.as_bytes()),
            crc32fast::hash(resource.as_bytes())
        );

        let mut cid = Self::new(Namespace::Http);
        cid.segments.push(derived);
        cid
    }

    /// 세그먼트 추가 (64비트 값을 16자리 hex로)
    pub fn push_segment(&mut self, value: u64) {
        self.segments.push(format!("{:016x}", value));
    }

    /// 루트 네임스페이스 반환
    ///
    /// 빈 식별자는 Unknown(u64::MAX)
    pub fn root_namespace(&self) -> Namespace {
        match self.segments.first() {
            Some(root) => match u64::from_str_radix(root, 16) {
                Ok(v) => Namespace::from_value(v),
                Err(_) => Namespace::Unknown(u64::MAX),
            },
            None => Namespace::Unknown(u64::MAX),
        }
    }

    /// 세그먼트 수
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// 빈 식별자 여부
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 와이어 상 식별자 길이 (바이트)
    ///
    /// 단편화 MTU 계산의 identifierOverhead
    pub fn wire_len(&self) -> usize {
        self.segments.len() * SEGMENT_HEX_WIDTH
    }

    /// 핫패스 맵 키용 32비트 해시
    pub fn hash32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for segment in &self.segments {
            hasher.update(segment.as_bytes());
        }
        hasher.finalize()
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_namespace() {
        let cid = ContentIdentifier::new(Namespace::Http);
        assert_eq!(cid.root_namespace(), Namespace::Http);
        assert_eq!(cid.wire_len(), SEGMENT_HEX_WIDTH);

        let cid = ContentIdentifier::new(Namespace::Ip);
        assert_eq!(cid.root_namespace(), Namespace::Ip);
    }

    #[test]
    fn test_parse_rejects_bad_width() {
        assert!(ContentIdentifier::parse("").is_none());
        assert!(ContentIdentifier::parse("0123abc").is_none());
        assert!(ContentIdentifier::parse("zzzzzzzzzzzzzzzz").is_none());

        let parsed = ContentIdentifier::parse("0000000000000001deadbeefcafe0123").unwrap();
        assert_eq!(parsed.segment_count(), 2);
        assert_eq!(parsed.root_namespace(), Namespace::Http);
    }

    #[test]
    fn test_response_identifier_is_deterministic() {
        let a = ContentIdentifier::response("example.com", "/index.html");
        let b = ContentIdentifier::response("example.com", "/index.html");
        let c = ContentIdentifier::response("example.com", "/other.html");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.root_namespace(), Namespace::Http);
        assert_eq!(a.wire_len(), 2 * SEGMENT_HEX_WIDTH);
        // 전체 길이는 항상 세그먼트 폭의 배수
        assert_eq!(a.to_string().len() % SEGMENT_HEX_WIDTH, 0);
    }

    #[test]
    fn test_hash32_differs_by_segment() {
        let mut a = ContentIdentifier::new(Namespace::Http);
        a.push_segment(42);
        let mut b = ContentIdentifier::new(Namespace::Http);
        b.push_segment(43);

        assert_ne!(a.hash32(), b.hash32());
        assert_eq!(a.hash32(), a.clone().hash32());
    }
}
