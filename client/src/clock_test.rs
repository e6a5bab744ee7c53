use super::*;

struct FixedSource(i64);

#[async_trait::async_trait]
impl TimeSource for FixedSource {
    async fn server_time(&self) -> Result<i64, ClientError> {
        Ok(self.0)
    }
}

struct FailingSource;

#[async_trait::async_trait]
impl TimeSource for FailingSource {
    async fn server_time(&self) -> Result<i64, ClientError> {
        Err(ClientError::WsClosed)
    }
}

struct SilentSource;

#[async_trait::async_trait]
impl TimeSource for SilentSource {
    async fn server_time(&self) -> Result<i64, ClientError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(0)
    }
}

#[test]
fn estimate_is_server_minus_local() {
    let clock = ServerClock::estimate(10_500, 10_000);
    assert_eq!(clock.offset_ms(), 500);
    assert_eq!(clock.server_now(20_000), 20_500);
    assert_eq!(clock.to_local(20_500), 20_000);
}

#[test]
fn negative_offset_when_local_runs_ahead() {
    let clock = ServerClock::estimate(9_000, 10_000);
    assert_eq!(clock.offset_ms(), -1_000);
    assert_eq!(clock.server_now(10_000), 9_000);
}

#[test]
fn default_is_local_clock() {
    let clock = ServerClock::default();
    assert_eq!(clock.server_now(1_234), 1_234);
}

#[tokio::test]
async fn calibrate_uses_reply_and_receipt_time() {
    let local = ManualClock::new(1_000_000);
    let clock = calibrate(&FixedSource(1_000_750), &local, Duration::from_secs(1)).await;
    assert_eq!(clock.offset_ms(), 750);
}

#[tokio::test]
async fn calibrate_failure_leaves_zero_offset() {
    let local = ManualClock::new(1_000_000);
    let clock = calibrate(&FailingSource, &local, Duration::from_secs(1)).await;
    assert_eq!(clock, ServerClock::default());
}

#[tokio::test]
async fn calibrate_timeout_leaves_zero_offset() {
    let local = ManualClock::new(1_000_000);
    let clock = calibrate(&SilentSource, &local, Duration::from_millis(20)).await;
    assert_eq!(clock.offset_ms(), 0);
}

#[test]
fn manual_clock_advances() {
    let local = ManualClock::new(5);
    local.advance(10);
    assert_eq!(local.now_ms(), 15);
    assert!(SystemClock.now_ms() > 0);
}
