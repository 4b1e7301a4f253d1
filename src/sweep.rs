//! 주기적 유지보수 스위퍼
//!
//! 버퍼/재조립/potential 그룹 스윕을 도는 취소 가능한 태스크 핸들.
//! 취소는 협력적: 루프가 반복 사이에 running 플래그를 확인함.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// 스위퍼 태스크 핸들 (join + 취소 플래그 보유)
pub struct SweeperHandle {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// interval 주기로 f를 실행하는 스위퍼 시작
    pub fn spawn<F>(interval: Duration, f: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_task = running.clone();

        let handle = tokio::spawn(async move {
            while running_task.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !running_task.load(Ordering::SeqCst) {
                    break;
                }
                f();
            }
            debug!("스위퍼 종료");
        });

        Self { running, handle }
    }

    /// 취소 요청 (다음 반복에서 종료)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 종료 대기
    pub async fn join(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_sweeper_runs_and_stops() {
        let count = Arc::new(AtomicU32::new(0));
        let count_task = count.clone();

        let sweeper = SweeperHandle::spawn(Duration::from_millis(5), move || {
            count_task.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(sweeper.is_running());
        sweeper.stop();
        assert!(!sweeper.is_running());

        let seen = count.load(Ordering::SeqCst);
        assert!(seen > 0);

        // 정지 후에는 더 돌지 않음
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = count.load(Ordering::SeqCst);
        assert!(after <= seen + 1);
    }

    #[tokio::test]
    async fn test_sweeper_join() {
        let sweeper = SweeperHandle::spawn(Duration::from_millis(5), || {});
        sweeper.join().await;
    }
}
