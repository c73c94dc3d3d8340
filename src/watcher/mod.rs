// Keyward — Change Watcher
//
// File events → debounce → one-slot trigger → single-flight reconcile
// worker. The scheduler feeds the same trigger after a completed rotation.

mod debounce;
mod error;
mod file_watcher;
mod trigger;
mod worker;

pub use debounce::debounce;
pub use error::WatchError;
pub use file_watcher::FileWatcher;
pub use trigger::ReconcileTrigger;
pub use worker::{run_reconcile_worker, PassOutcome, Reconciler};
