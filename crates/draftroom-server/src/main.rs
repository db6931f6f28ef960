// Draft room server entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first start)
// 2. Initialize tracing
// 3. Open database; `draftroom import <export.json>` imports and exits,
//    `draftroom clear` wipes draft state and history and exits
// 4. Seed candidates from CSV when the table is empty
// 5. Open the draft room (crash recovery) and spawn it
// 6. Apply the configured team count if the draft has none
// 7. Spawn the WebSocket server
// 8. Wait for Ctrl+C, then shut down

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use draftroom_core::db::Database;
use draftroom_core::draft::seed;
use draftroom_core::store::DraftStore;
use draftroom_core::DraftRoom;
use draftroom_server::config::{self, Config};
use draftroom_server::ws_server;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config)?;
    info!(
        "Draft room '{}' starting up: {} rounds, up to {} teams",
        config.draft.name, config.draft.max_rounds, config.draft.max_teams
    );

    // 3. Open database
    let db_path = config.db_path()?;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_path_str = db_path.to_string_lossy();
    let db = Database::open(&db_path_str).context("failed to open database")?;
    info!("Database opened at {}", db_path.display());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, file] = args.as_slice() {
        if command == "import" {
            return import_legacy(&db, Path::new(file));
        }
    }
    if let [command] = args.as_slice() {
        if command == "clear" {
            db.clear_draft()?;
            info!("Cleared draft state and nomination history");
            return Ok(());
        }
    }
    if !args.is_empty() {
        anyhow::bail!("usage: draftroom [import <export.json> | clear]");
    }

    // 4. Seed candidates
    if db.candidate_count()? == 0 {
        let path = Path::new(&config.draft.candidates_path);
        let candidates = seed::load_candidates(path).context("failed to load candidates")?;
        if candidates.is_empty() {
            warn!("No candidates found in {}", path.display());
        }
        db.seed_candidates(&candidates)?;
        info!("Seeded {} candidates from {}", candidates.len(), path.display());
    }

    // 5. Open the draft room
    let store: Arc<dyn DraftStore> = Arc::new(db);
    let room = DraftRoom::open(config.draft.settings(), store)
        .await
        .context("crash recovery failed")?;
    let (handle, room_task) = room.spawn();

    // 6. Configured team count
    if let Some(count) = config.draft.team_count {
        if handle.snapshot().total_team_count.is_none() {
            handle
                .configure_team_count(count)
                .await
                .context("failed to apply configured team count")?;
        }
    }

    // 7. WebSocket server
    let bind_addr = config.server.websocket.bind_addr();
    let listener = ws_server::bind(&bind_addr).await?;
    let admin_password = config.credentials.admin_password.clone();
    if admin_password.is_none() {
        warn!("No admin_password configured; admin intents are open to every client");
    }
    let ws_handle = tokio::spawn(ws_server::run(listener, handle.clone(), admin_password));
    info!("Draft room ready on ws://{bind_addr}");

    // 8. Wait for shutdown
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown requested");
        }
        result = ws_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("WebSocket server error: {e:#}"),
                Err(e) => error!("WebSocket server task failed: {e}"),
            }
        }
    }

    // Sessions hold handles of their own; don't wait on them forever.
    drop(handle);
    let _ = tokio::time::timeout(Duration::from_secs(5), room_task).await;

    info!("Draft room shut down cleanly");
    Ok(())
}

fn import_legacy(db: &Database, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let count = db.import_legacy_json(&text)?;
    info!("Imported {count} candidates from {}", file.display());
    Ok(())
}

/// Initialize tracing to stderr. `RUST_LOG` overrides the configured filter.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
