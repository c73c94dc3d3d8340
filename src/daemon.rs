// Keyward — Daemon
//
// Builds every component once from configuration and the keyring, then runs
// the change watcher, the reconcile worker, the periodic policy evaluation
// and the control socket side by side until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alerts::FanoutNotifier;
use crate::audit::{AuditLog, SqliteAuditLog};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::context::EngineContext;
use crate::enclave::{Fingerprinter, KeyringProvider, MasterKeyProvider};
use crate::error::{KeywardError, Result};
use crate::gateway::{ControlState, UdsServer};
use crate::rotation::providers::DeclineChallenges;
use crate::rotation::{RotatorRegistry, Scheduler, SessionDrivers};
use crate::store::{CredentialStore, Database, SharedDatabase, StateRepository};
use crate::sync::{GithubSecretStore, StoreTokenSource, SyncEngine, SyncLedger};
use crate::watcher::{debounce, run_reconcile_worker, FileWatcher, ReconcileTrigger, Reconciler};

/// File locations, all overridable from the command line.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub credentials: PathBuf,
    pub socket: PathBuf,
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn database(&self) -> PathBuf {
        self.data_dir.join("keyward.db")
    }
}

/// Open the encrypted state database with the key derived from the master
/// secret. Fails if `keyward init` has not been run.
pub fn open_database(paths: &Paths, provider: &dyn MasterKeyProvider) -> Result<(SharedDatabase, Fingerprinter)> {
    if !provider.has_master_secret()? {
        return Err(KeywardError::NotInitialized);
    }
    let master = provider.get_master_secret()?;
    let keys = provider.derive_keys(&master)?;

    let path = paths.database();
    if !path.exists() {
        return Err(KeywardError::NotInitialized);
    }
    let db = Database::open(&path, &keys.db_key_hex())?;
    let fingerprinter = Fingerprinter::new(&keys.fingerprint_key)?;
    Ok((SharedDatabase::new(db), fingerprinter))
}

/// Every long-lived component, wired together.
pub struct Components {
    pub config: Arc<Config>,
    pub store: Arc<CredentialStore>,
    pub audit: Arc<dyn AuditLog>,
    pub scheduler: Arc<Scheduler>,
    pub reconciler: Arc<Reconciler>,
    pub trigger: Arc<ReconcileTrigger>,
}

impl Components {
    pub fn build(paths: &Paths) -> Result<Self> {
        let config = Arc::new(Config::load(&paths.config)?);
        let (db, fingerprinter) = open_database(paths, &KeyringProvider::new())?;

        let retry = config.daemon.retry;
        let http = EngineContext::http_client(&retry)?;
        let notifier = Arc::new(FanoutNotifier::from_config(&config.notifications, &http));
        let ctx = Arc::new(EngineContext::new(fingerprinter, http.clone(), notifier, retry));

        let catalog = Arc::new(Catalog::new(Arc::clone(&config)));
        let store = Arc::new(CredentialStore::new(
            paths.credentials.clone(),
            catalog.clone(),
            StateRepository::new(db.clone()),
        ));
        let audit: Arc<dyn AuditLog> = Arc::new(SqliteAuditLog::new(db.clone())?);

        let token = Arc::new(StoreTokenSource::new(Arc::clone(&store), config.github.token_credential.clone()));
        let remote = Arc::new(GithubSecretStore::new(http, config.github.api_url.clone(), token));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&ctx),
            remote,
            SyncLedger::new(db),
            Arc::clone(&audit),
        ));

        // Session drivers are compiled in; none ship with the daemon itself.
        let registry = RotatorRegistry::from_config(
            &config,
            &ctx,
            &store,
            &SessionDrivers::new(),
            Arc::new(DeclineChallenges),
        )?;

        let trigger = Arc::new(ReconcileTrigger::new());
        let scheduler = Arc::new(Scheduler::new(
            ctx,
            Arc::clone(&store),
            Arc::new(registry),
            config.policy.clone(),
            Arc::clone(&audit),
            trigger.clone(),
            config.daemon.max_in_flight,
            config.daemon.job_history,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            catalog,
            engine,
            config.targets.clone(),
            Arc::clone(&audit),
        ));

        Ok(Self {
            config,
            store,
            audit,
            scheduler,
            reconciler,
            trigger,
        })
    }
}

pub struct Daemon {
    paths: Paths,
    components: Components,
}

impl Daemon {
    pub fn new(paths: Paths) -> Result<Self> {
        let components = Components::build(&paths)?;
        Ok(Self { paths, components })
    }

    pub async fn run(self) -> Result<()> {
        let c = &self.components;

        let first = c.reconciler.run_once().await?;
        tracing::info!(
            credentials = first.reload.added.len() + first.reload.unchanged,
            pushed = first.sync.pushed,
            "Initial reconcile finished"
        );

        let (events_tx, events_rx) = mpsc::channel(64);
        let _watcher = FileWatcher::spawn(c.store.path(), events_tx)?;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(debounce(
            events_rx,
            c.config.daemon.debounce,
            c.trigger.clone(),
        )));
        tasks.push(tokio::spawn(run_reconcile_worker(
            Arc::clone(&c.reconciler),
            Arc::clone(&c.trigger),
        )));
        tasks.push(tokio::spawn(evaluation_loop(
            Arc::clone(&c.scheduler),
            c.config.daemon.evaluation_interval,
        )));

        let gateway = UdsServer::new(
            self.paths.socket.clone(),
            Arc::new(ControlState {
                store: Arc::clone(&c.store),
                scheduler: Arc::clone(&c.scheduler),
                reconciler: Arc::clone(&c.reconciler),
                audit: Arc::clone(&c.audit),
            }),
        );

        let outcome = tokio::select! {
            served = gateway.run() => served.map_err(KeywardError::from),
            signal = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                signal.map_err(KeywardError::from)
            }
        };

        for task in &tasks {
            task.abort();
        }
        if self.paths.socket.exists() {
            let _ = std::fs::remove_file(&self.paths.socket);
        }
        outcome
    }
}

async fn evaluation_loop(scheduler: Arc<Scheduler>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match scheduler.evaluate(Utc::now()).await {
            Ok(summary) => tracing::info!(
                started = summary.started.len(),
                awaiting_approval = summary.awaiting_approval.len(),
                upcoming = summary.upcoming.len(),
                "Policy evaluation finished"
            ),
            Err(e) => tracing::error!(error = %e, "Policy evaluation failed"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
