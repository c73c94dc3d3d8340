// Keyward — Debounce
//
// Collapses a burst of file events into one trigger, fired once the file
// has been quiet for the whole window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::sync::SyncTrigger;

/// Runs until the event channel closes.
pub async fn debounce(mut events: mpsc::Receiver<()>, window: Duration, trigger: Arc<dyn SyncTrigger>) {
    while events.recv().await.is_some() {
        let mut deadline = Instant::now() + window;

        loop {
            tokio::select! {
                next = events.recv() => match next {
                    Some(()) => deadline = Instant::now() + window,
                    None => {
                        trigger.trigger();
                        return;
                    }
                },
                _ = sleep_until(deadline) => {
                    tracing::debug!(window_ms = window.as_millis() as u64, "Credential file settled");
                    trigger.trigger();
                    break;
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
