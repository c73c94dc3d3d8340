// Keyward — Reconcile trigger
//
// A one-slot pending flag. Any number of `trigger` calls made while the
// worker is busy collapse into a single pending pass.

use tokio::sync::Notify;

use crate::sync::SyncTrigger;

#[derive(Default)]
pub struct ReconcileTrigger {
    pending: Notify,
}

impl ReconcileTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a trigger is pending, consuming it.
    pub async fn wait(&self) {
        self.pending.notified().await;
    }
}

impl SyncTrigger for ReconcileTrigger {
    fn trigger(&self) {
        self.pending.notify_one();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_triggers_coalesce_into_one_pending() {
        let trigger = ReconcileTrigger::new();
        trigger.trigger();
        trigger.trigger();
        trigger.trigger();

        trigger.wait().await;
        let second = tokio::time::timeout(Duration::from_millis(50), trigger.wait()).await;
        assert!(second.is_err(), "only one pass should be pending");
    }

    #[tokio::test]
    async fn test_wait_blocks_without_trigger() {
        let trigger = ReconcileTrigger::new();
        let waited = tokio::time::timeout(Duration::from_millis(20), trigger.wait()).await;
        assert!(waited.is_err());
    }
}
