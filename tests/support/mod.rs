//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mock_transport;
pub mod recording_monitor;
pub mod socket_guard;

use std::time::Duration;

/// Polls `condition` every few milliseconds, failing after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
