//! Headless sync agent for a caseworker's machine.
//!
//! Keeps the local database in the platform data directory, probes the
//! server every `sync.interval` seconds and replays queued changes whenever
//! it becomes reachable. Stop with Ctrl-C.

use anyhow::Context;
use api::{HttpApi, RemoteApi, Session};
use offline::{ActivityLog, Desk, SyncContext};
use store::{FileStore, KvStore};
use tracing_subscriber::EnvFilter;

mod settings;

use settings::Settings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("loading settings")?;
    let data_dir = settings.data_dir();
    tracing::info!("Local data in {}", data_dir.display());

    let api = HttpApi::with_timeout(&settings.api.url, settings.timeout())
        .context("building HTTP client")?;
    let ctx = SyncContext::new(false);
    let desk = Desk::new(
        FileStore::new(data_dir),
        api.clone(),
        ctx.clone(),
        ActivityLog::new(),
    );

    if let Err(e) = desk.queue().migrate_legacy_deletes().await {
        tracing::warn!("Legacy pending deletes not migrated: {e}");
    }
    match desk.queue().len().await {
        Ok(n) => tracing::info!("{n} changes waiting to sync"),
        Err(e) => tracing::warn!("Local store unavailable, running network-only: {e}"),
    }

    tokio::select! {
        _ = desk.engine().run(&ctx) => {}
        _ = probe(&api, &desk, &settings) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}

/// Feed the connectivity signal from periodic pings.
async fn probe<S: KvStore, A: RemoteApi>(api: &A, desk: &Desk<S, A>, settings: &Settings) {
    let mut ticker = tokio::time::interval(settings.probe_interval());
    loop {
        ticker.tick().await;
        let reachable = api.ping().await.is_ok();
        // sign in before announcing the connection so the flush has a token;
        // the session is also dropped when the server refuses it mid-sync
        let signed_in =
            reachable && desk.context().token().is_none() && sign_in(desk, settings).await;
        if desk.context().set_online(reachable) {
            tracing::info!(reachable, "Connectivity changed");
        } else if signed_in {
            desk.context().request_sync();
        }
    }
}

/// Returns whether a session was established.
async fn sign_in<S: KvStore, A: RemoteApi>(desk: &Desk<S, A>, settings: &Settings) -> bool {
    if let Some(token) = &settings.api.token {
        desk.context().set_session(Session {
            token: token.clone(),
            role: None,
        });
        return true;
    }
    let (Some(username), Some(password)) = (&settings.api.username, &settings.api.password)
    else {
        tracing::debug!(
            "No credentials configured; set RELIEF_API_USERNAME and RELIEF_API_PASSWORD"
        );
        return false;
    };
    match desk.login(username, password).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Sign-in failed: {e}");
            false
        }
    }
}
