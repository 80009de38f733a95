mod cli;
mod render;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use feed_sync::{telemetry, ConnectionState, FetchStatus, SyncConfig, SyncEngine, View};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::Cli;

fn build_config(cli: &Cli) -> SyncConfig {
    let mut config = SyncConfig::from_env();
    if let Some(api) = &cli.api {
        config = config.with_api_base(api.clone());
    }
    if let Some(ws) = &cli.ws {
        config = config.with_ws_url(ws);
    }
    if let Some(viewer) = &cli.viewer {
        config = config.with_viewer(viewer.clone());
    }
    config
}

fn check(status: FetchStatus, view: &View) -> Result<bool> {
    match status {
        FetchStatus::Loaded { added, exhausted } => {
            info!(?view, added, exhausted, "page loaded");
            Ok(!exhausted)
        }
        FetchStatus::Exhausted => Ok(false),
        FetchStatus::Busy | FetchStatus::Discarded => Ok(true),
        FetchStatus::Failed(err) => Err(err).with_context(|| format!("loading {view:?}")),
    }
}

async fn load(engine: &SyncEngine, view: &View, pages: u32) -> Result<()> {
    let Some(key) = view.partition() else {
        return Ok(());
    };
    for _ in 1..pages {
        if !check(engine.request_next_page(&key).await, view)? {
            break;
        }
    }
    Ok(())
}

async fn watch(engine: &SyncEngine, view: &View, reconnect: Option<Duration>) -> Result<()> {
    let mut events = engine.events();
    let mut state = engine.watch_connection();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) if render::concerns(view, &event) => render::print_view(engine, view),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change events lagged; redrawing");
                    render::print_view(engine, view);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *state.borrow_and_update();
                info!(?current, "push connection state");
                if current != ConnectionState::Disconnected {
                    continue;
                }
                let Some(delay) = reconnect else {
                    warn!("push connection lost; updates have stopped");
                    continue;
                };
                tokio::time::sleep(delay).await;
                if let Err(err) = engine.reconnect().await {
                    warn!(error = %err, "reconnect failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = build_config(&cli);
    telemetry::init_tracing(&config.log_filter);

    let engine = SyncEngine::from_config(config);
    let view = cli.command.view();
    if engine.channel_for(&view).is_none() {
        bail!("the personal feed needs --viewer or FEED_VIEWER_ID");
    }

    let (mounted, status) = engine.mount(view.clone()).await;
    let more = check(status, &view)?;
    if more {
        load(&engine, &view, cli.pages).await?;
    }
    render::print_view(&engine, &view);

    if !cli.once {
        watch(&engine, &view, cli.reconnect_secs.map(Duration::from_secs)).await?;
    }

    mounted.unmount(&engine, false);
    engine.shutdown();
    Ok(())
}
