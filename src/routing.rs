//! 라우팅 코어 경계
//!
//! pub/sub 코어는 불투명한 RPC 경계로만 다룸 (와이어 인코딩은 범위 밖)

use bytes::Bytes;

use crate::error::Result;
use crate::identifier::ContentIdentifier;
use crate::NodeId;

/// 라우팅 코어 이벤트 (블로킹 next-event 호출의 태그드 유니언)
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    /// 스코프 발행됨
    ScopePublished(ContentIdentifier),

    /// 스코프 철회됨
    ScopeUnpublished(ContentIdentifier),

    /// 전달 경로 준비됨 (forwarding 시작 신호)
    StartPublish(ContentIdentifier),

    /// 전달 경로 철회됨
    StopPublish(ContentIdentifier),

    /// 데이터 도착
    PublishedData {
        identifier: ContentIdentifier,
        data: Bytes,
    },

    /// 암묵적 구독과 함께 데이터 도착 (발신 노드 포함)
    PublishedDataImplicitSub {
        identifier: ContentIdentifier,
        node: NodeId,
        data: Bytes,
    },

    /// 재발행 요청
    RePublish(ContentIdentifier),

    /// 발행 일시정지 (엔드포인트 전환 중)
    PausePublish(ContentIdentifier),

    /// 발행 재개
    ResumePublish(ContentIdentifier),
}

/// 라우팅 코어 프리미티브
///
/// 구현체는 실제 코어와의 RPC를 담당, 이 크레이트는 호출만 함
pub trait RoutingCore: Send + Sync {
    /// 스코프 발행
    fn publish_scope(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// 정보 항목 발행 (가용성 광고)
    fn publish_info(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// 정보 항목 철회
    fn unpublish_info(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// 정보 항목 구독
    fn subscribe_info(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// 구독 해지
    fn unsubscribe_info(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// 데이터 발행 (유니캐스트)
    fn publish_data(&self, identifier: &ContentIdentifier, payload: Bytes) -> Result<()>;

    /// 명시적 그룹으로 데이터 발행
    fn publish_data_to_group(
        &self,
        identifier: &ContentIdentifier,
        nodes: &[NodeId],
        payload: Bytes,
    ) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! 테스트용 기록 모의 코어

    use super::*;
    use parking_lot::Mutex;

    /// 기록된 코어 호출
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CoreCall {
        PublishScope(String),
        PublishInfo(String),
        UnpublishInfo(String),
        SubscribeInfo(String),
        UnsubscribeInfo(String),
        PublishData(String, Vec<u8>),
        PublishDataToGroup(String, Vec<NodeId>, Vec<u8>),
    }

    /// 모든 호출을 순서대로 기록하는 모의 라우팅 코어
    #[derive(Default)]
    pub struct RecordingCore {
        pub calls: Mutex<Vec<CoreCall>>,
    }

    impl RecordingCore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<CoreCall> {
            self.calls.lock().clone()
        }

        /// publish_info 호출 횟수
        pub fn advertise_count(&self) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| matches!(c, CoreCall::PublishInfo(_)))
                .count()
        }

        /// publish_data 호출 횟수
        pub fn publish_data_count(&self) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| matches!(c, CoreCall::PublishData(_, _)))
                .count()
        }
    }

    impl RoutingCore for RecordingCore {
        fn publish_scope(&self, identifier: &ContentIdentifier) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::PublishScope(identifier.to_string()));
            Ok(())
        }

        fn publish_info(&self, identifier: &ContentIdentifier) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::PublishInfo(identifier.to_string()));
            Ok(())
        }

        fn unpublish_info(&self, identifier: &ContentIdentifier) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::UnpublishInfo(identifier.to_string()));
            Ok(())
        }

        fn subscribe_info(&self, identifier: &ContentIdentifier) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::SubscribeInfo(identifier.to_string()));
            Ok(())
        }

        fn unsubscribe_info(&self, identifier: &ContentIdentifier) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::UnsubscribeInfo(identifier.to_string()));
            Ok(())
        }

        fn publish_data(&self, identifier: &ContentIdentifier, payload: Bytes) -> Result<()> {
            self.calls
                .lock()
                .push(CoreCall::PublishData(identifier.to_string(), payload.to_vec()));
            Ok(())
        }

        fn publish_data_to_group(
            &self,
            identifier: &ContentIdentifier,
            nodes: &[NodeId],
            payload: Bytes,
        ) -> Result<()> {
            self.calls.lock().push(CoreCall::PublishDataToGroup(
                identifier.to_string(),
                nodes.to_vec(),
                payload.to_vec(),
            ));
            Ok(())
        }
    }
}
