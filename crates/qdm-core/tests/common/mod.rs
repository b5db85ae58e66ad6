#![allow(dead_code)]

pub mod range_server;

use std::time::Duration;

use qdm_core::CoreEvent;
use tokio::sync::broadcast;

/// Wait until `pred` accepts an event, returning every event seen on the way.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<CoreEvent>,
    timeout: Duration,
    pred: impl Fn(&CoreEvent) -> bool,
) -> Vec<CoreEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = pred(&event);
                    seen.push(event);
                    if done {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out; saw {seen:?}"));
    seen
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}
