use std::time::Duration;

use tokio::time::{Instant, sleep};

#[test_timeout::tokio_timeout_test(2, paused)]
async fn paused_clock_sleeps_past_the_limit() {
    let start = Instant::now();
    sleep(Duration::from_secs(30)).await;
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[test_timeout::tokio_timeout_test(2)]
async fn real_clock_runs_within_the_limit() {
    sleep(Duration::from_millis(10)).await;
}

