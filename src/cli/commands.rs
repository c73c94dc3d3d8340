// Keyward — CLI Command Handlers
//
// Each function handles one subcommand. `init`, `classify`, `sync` and
// `serve` work on local state; every other command is a JSON-RPC call to
// the running daemon.

use std::path::Path;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use zeroize::Zeroizing;

use crate::audit::{AuditAction, AuditRecord};
use crate::catalog::Catalog;
use crate::config::{self, Config};
use crate::daemon::{Components, Daemon, Paths};
use crate::enclave::{KeyringProvider, MasterKeyProvider};
use crate::error::{KeywardError, Result};
use crate::gateway::{GatewayClient, UdsServer};
use crate::rotation::RotationJob;
use crate::store::{envfile, Annotate, CredentialMetadata, CredentialRole, Database};
use crate::sync::SyncReport;

use super::{Cli, Commands};

fn paths(cli: &Cli) -> Paths {
    Paths {
        config: cli.config.clone().unwrap_or_else(config::default_config_path),
        credentials: cli.credentials.clone(),
        socket: cli.socket.clone().unwrap_or_else(UdsServer::default_socket_path),
        data_dir: config::data_dir(),
    }
}

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<()> {
    let paths = paths(&cli);
    match cli.command {
        Commands::Init => cmd_init(&paths),
        Commands::Classify => cmd_classify(&paths),
        Commands::Sync => cmd_sync(&paths).await,
        Commands::Serve => Daemon::new(paths)?.run().await,
        Commands::Status => cmd_status(&paths).await,
        Commands::Rotate {
            name,
            emergency,
            reason,
        } => cmd_rotate(&paths, name, emergency, reason).await,
        Commands::Approve { name } => cmd_job_call(&paths, "rotation.approve", name).await,
        Commands::Complete { name } => cmd_complete(&paths, name).await,
        Commands::Rollback { name } => cmd_job_call(&paths, "rotation.rollback", name).await,
        Commands::Jobs => cmd_jobs(&paths).await,
        Commands::Audit {
            name,
            action,
            since,
            until,
            limit,
        } => {
            let actions = action
                .iter()
                .map(|a| AuditAction::parse(a).ok_or_else(|| KeywardError::Other(format!("Unknown audit action '{}'", a))))
                .collect::<Result<Vec<_>>>()?;
            let query = json!({
                "credential_name": name,
                "actions": actions,
                "since": since,
                "until": until,
                "limit": limit,
            });
            cmd_audit(&paths, query).await
        }
    }
}

// ─── Init ────────────────────────────────────────────────────────────────────

fn cmd_init(paths: &Paths) -> Result<()> {
    let provider = KeyringProvider::new();
    std::fs::create_dir_all(&paths.data_dir)?;

    let master_secret = provider.get_or_create_master_secret()?;
    let keys = provider.derive_keys(&master_secret)?;

    let path = paths.database();
    Database::open(&path, &keys.db_key_hex())
        .map_err(|e| KeywardError::Other(format!("Failed to initialize database: {}", e)))?;

    println!("✓ Keyward initialized");
    println!("  State:  {}", path.display());
    println!("  Master key stored in platform keyring");
    if !paths.config.exists() {
        println!();
        println!("No configuration at {}; defaults apply until you create one.", paths.config.display());
    }
    println!();
    println!("Next: `keyward classify` to review how your credentials are treated.");

    Ok(())
}

// ─── Classify ────────────────────────────────────────────────────────────────

struct ClassifyRow {
    name: String,
    classification: String,
    tier: String,
    provider: String,
    role: &'static str,
    reason: String,
}

fn classify_rows(config: Config, credentials: &Path) -> Result<Vec<ClassifyRow>> {
    let catalog = Catalog::new(std::sync::Arc::new(config));
    let entries = envfile::read(credentials)?;

    Ok(entries
        .keys()
        .map(|name| {
            let decision = catalog.decide(name);
            let annotation = catalog.annotate(name);
            ClassifyRow {
                name: name.clone(),
                classification: decision.classification.to_string(),
                tier: annotation.security_tier.to_string(),
                provider: annotation.provider.unwrap_or_else(|| "-".to_string()),
                role: match annotation.role {
                    CredentialRole::Bootstrap => "bootstrap",
                    CredentialRole::Standard => "",
                },
                reason: decision.reason.to_string(),
            }
        })
        .collect())
}

fn cmd_classify(paths: &Paths) -> Result<()> {
    let rows = classify_rows(Config::load(&paths.config)?, &paths.credentials)?;

    if rows.is_empty() {
        println!("No credentials in {}", paths.credentials.display());
        return Ok(());
    }

    println!("{} ({} names):\n", paths.credentials.display(), rows.len());
    for row in &rows {
        println!(
            "  {:32} │ {:7} │ {:8} │ {:10} │ {:9} │ {}",
            row.name, row.classification, row.tier, row.provider, row.role, row.reason
        );
    }
    Ok(())
}

// ─── Sync ────────────────────────────────────────────────────────────────────

async fn cmd_sync(paths: &Paths) -> Result<()> {
    let components = Components::build(paths)?;
    let outcome = components.reconciler.run_once().await?;
    print_sync_report(&outcome.sync);
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    println!("✓ Reconcile finished: {} pushed, {} skipped", report.pushed, report.skipped);
    for rejection in &report.rejected {
        println!("  ✗ {} rejected: {}", rejection.destination, rejection.reason);
    }
    for failure in &report.failed {
        println!(
            "  ✗ {} → {}: {:?} ({})",
            failure.name, failure.destination, failure.kind, failure.message
        );
    }
}

// ─── Daemon-bound commands ───────────────────────────────────────────────────

async fn client(paths: &Paths) -> Result<GatewayClient> {
    Ok(GatewayClient::connect(&paths.socket).await?)
}

async fn cmd_status(paths: &Paths) -> Result<()> {
    let mut client = client(paths).await?;
    let status = client.call("status", Value::Null).await?;
    let credentials: Vec<CredentialMetadata> =
        serde_json::from_value(client.call("credentials.list", Value::Null).await?).map_err(protocol)?;

    println!("Keyward {} watching {}", status["version"].as_str().unwrap_or("?"), status["credential_file"].as_str().unwrap_or("?"));
    println!(
        "  {} credentials, {} rotating, {} awaiting approval, {} awaiting a manual value\n",
        status["credentials"], status["active_jobs"], status["awaiting_approval"], status["awaiting_manual"]
    );
    for meta in &credentials {
        let rotated = meta
            .last_rotated_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("  {} │ rotated {}", meta, rotated);
    }
    Ok(())
}

async fn cmd_rotate(paths: &Paths, name: String, emergency: bool, reason: Option<String>) -> Result<()> {
    let method = if emergency { "rotation.emergency" } else { "rotation.request" };
    let job = call_for_job(paths, method, json!({ "name": name, "reason": reason })).await?;
    print_job("Rotation requested", &job);
    Ok(())
}

async fn cmd_job_call(paths: &Paths, method: &str, name: String) -> Result<()> {
    let job = call_for_job(paths, method, json!({ "name": name })).await?;
    print_job("✓", &job);
    Ok(())
}

async fn cmd_complete(paths: &Paths, name: String) -> Result<()> {
    let mut raw = Zeroizing::new(String::new());
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let value = raw.trim_end_matches(['\r', '\n']);
    if value.is_empty() {
        return Err(KeywardError::Other("No value on stdin".to_string()));
    }

    let job = call_for_job(paths, "rotation.complete", json!({ "name": name, "value": value })).await?;
    print_job("Manual rotation submitted", &job);
    Ok(())
}

async fn cmd_jobs(paths: &Paths) -> Result<()> {
    let mut client = client(paths).await?;
    let result = client.call("rotation.jobs", Value::Null).await?;
    let current: Vec<RotationJob> = serde_json::from_value(result["current"].clone()).map_err(protocol)?;
    let history: Vec<RotationJob> = serde_json::from_value(result["history"].clone()).map_err(protocol)?;

    if current.is_empty() && history.is_empty() {
        println!("No rotation jobs.");
        return Ok(());
    }
    println!("Current jobs ({}):", current.len());
    for job in &current {
        println!("  {}", describe(job));
    }
    if !history.is_empty() {
        println!("\nEarlier jobs ({}):", history.len());
        for job in &history {
            println!("  {}", describe(job));
        }
    }
    Ok(())
}

async fn cmd_audit(paths: &Paths, query: Value) -> Result<()> {
    let mut client = client(paths).await?;
    let records: Vec<AuditRecord> =
        serde_json::from_value(client.call("audit.query", query).await?).map_err(protocol)?;

    if records.is_empty() {
        println!("No audit records match.");
        return Ok(());
    }
    println!("{:-<80}", "");
    for record in &records {
        println!("{}", record);
    }
    println!("{:-<80}", "");
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn call_for_job(paths: &Paths, method: &str, params: Value) -> Result<RotationJob> {
    let mut client = client(paths).await?;
    serde_json::from_value(client.call(method, params).await?).map_err(protocol)
}

fn describe(job: &RotationJob) -> String {
    let mut line = format!(
        "{:32} │ {:11} │ {:9} │ {:8} │ {}",
        job.credential_name,
        job.state.to_string(),
        job.reason.to_string(),
        job.tier.to_string(),
        job.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if job.awaiting_approval {
        line.push_str(" │ awaiting approval");
    }
    if job.awaiting_manual {
        line.push_str(" │ awaiting manual value");
    }
    if let Some(failure) = &job.failure {
        line.push_str(&format!(" │ {}", failure));
    }
    line
}

fn print_job(prefix: &str, job: &RotationJob) {
    println!("{} {}", prefix, describe(job));
}

fn protocol(e: serde_json::Error) -> KeywardError {
    KeywardError::Gateway(e.into())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
bootstrap = ["OPENAI_ADMIN_KEY"]

[[providers]]
key = "openai"
strategy = "manual"
credentials = ["OPENAI_*"]
"#;

    #[test]
    fn test_classify_rows_cover_every_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "OPENAI_API_KEY=sk\nOPENAI_ADMIN_KEY=admin\nPORT=3000\n").unwrap();

        let rows = classify_rows(Config::from_toml(CONFIG).unwrap(), &path).unwrap();
        let by_name = |n: &str| rows.iter().find(|r| r.name == n).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(by_name("OPENAI_API_KEY").classification, "secret");
        assert_eq!(by_name("OPENAI_API_KEY").provider, "openai");
        assert_eq!(by_name("OPENAI_ADMIN_KEY").role, "bootstrap");
        assert_eq!(by_name("PORT").classification, "setting");
        assert_eq!(by_name("PORT").provider, "-");
    }

    #[test]
    fn test_classify_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = classify_rows(Config::from_toml("").unwrap(), &dir.path().join("absent.env")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_describe_flags_waiting_jobs() {
        let mut job = RotationJob::new(
            "STRIPE_SECRET_KEY",
            crate::rotation::RotationReason::Scheduled,
            crate::store::SecurityTier::High,
            "keyward",
        );
        job.awaiting_approval = true;
        let line = describe(&job);
        assert!(line.contains("STRIPE_SECRET_KEY"));
        assert!(line.contains("awaiting approval"));
    }
}
