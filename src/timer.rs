//! 루프 타이머
//!
//! 재전송 루프와 지연 ACK 루프가 쓰는 재설정 가능한 단발 타이머.
//! 정지된 타이머는 절대 발화하지 않는다.

use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Instant;

use tokio::time::{sleep_until, Duration, Sleep};

/// 프로세스 단조 시계 (ms)
pub(crate) fn now_ms() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i64
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86400 * 365)
}

/// `reset` / `stop` / `try_active`를 지원하는 루프 타이머
///
/// `tokio::select!` 분기에서 `expired()`로 대기한다. 정지 상태의
/// `expired()`는 완료되지 않으므로 해당 분기는 발화하지 않는다.
pub(crate) struct LoopTimer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl LoopTimer {
    /// 정지 상태로 생성
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(sleep_until(far_future())),
            armed: false,
        }
    }

    /// `ms` 뒤 발화하도록 재설정
    pub fn reset(&mut self, ms: i64) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(ms.max(1) as u64);
        self.sleep.as_mut().reset(deadline);
        self.armed = true;
    }

    /// 정지. 이미 지난 데드라인이 있어도 발화하지 않는다.
    pub fn stop(&mut self) {
        self.armed = false;
    }

    /// 정지 상태거나 이미 만료된 경우에만 재설정
    pub fn try_active(&mut self, ms: i64) {
        if !self.armed || self.sleep.is_elapsed() {
            self.reset(ms);
        }
    }

    /// 발화 대기. 발화하면 정지 상태가 된다.
    pub async fn expired(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_reset_fires() {
        let mut timer = LoopTimer::new();
        timer.reset(10);
        assert!(timeout(Duration::from_millis(500), timer.expired())
            .await
            .is_ok());
        // 발화 후에는 정지 상태
        assert!(timeout(Duration::from_millis(50), timer.expired())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stopped_never_fires() {
        let mut timer = LoopTimer::new();
        timer.reset(10);
        timer.stop();
        assert!(timeout(Duration::from_millis(80), timer.expired())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_try_active_keeps_earlier_deadline() {
        let mut timer = LoopTimer::new();
        timer.reset(20);
        timer.try_active(5_000);
        // 앞선 데드라인이 유지되어야 한다
        assert!(timeout(Duration::from_millis(500), timer.expired())
            .await
            .is_ok());
    }

    #[test]
    fn test_now_ms_monotonic() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
