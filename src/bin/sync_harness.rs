//! Local harness: runs a hub against in-memory collaborators for a few
//! seconds and prints every published event as JSON on stdout.
//!
//! Usage: `mentions-sync-harness [--config PATH] [--secs N]`
//!
//! Tracing goes to stderr so stdout stays machine-readable.

use chrono::{TimeDelta, Utc};
use mentions_sync::clock::{self, TICK_CHANNEL_CAPACITY};
use mentions_sync::collab::{
    Collaborators, RecordingPurger, ScriptedMentionSource, ScriptedRefresher,
};
use mentions_sync::{
    HubStores, IssuedToken, Mention, Secret, SessionId, SyncConfig, SyncHub, UserScope,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Args {
    config: Option<PathBuf>,
    secs: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: None,
        secs: 5,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                args.config = Some(PathBuf::from(path));
            }
            "--secs" => {
                let raw = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--secs needs a number"))?;
                args.secs = raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid --secs {raw:?}: {e}"))?;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::from_file(path)?,
        None => {
            let default = SyncConfig::default_config_path();
            if default.exists() {
                SyncConfig::from_file(&default)?
            } else {
                SyncConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = load_config(args.config.as_ref())?;

    let mentions = Arc::new(ScriptedMentionSource::new());
    mentions.push_items(vec![Mention {
        id: uuid::Uuid::new_v4().to_string(),
        url: "https://github.com/octo-org/octo-repo/issues/1".to_owned(),
        title: "@octocat please take a look".to_owned(),
        updated_at: Utc::now(),
    }]);
    let collab = Collaborators::new(
        mentions,
        Arc::new(ScriptedRefresher::new()),
        Arc::new(RecordingPurger::reporting(1)),
    );

    let stores = HubStores::from_config(&config.state)?;
    let hub = SyncHub::start(&config, collab, stores).await?;
    let mut events = hub.subscribe();

    // Expires immediately so the first tick exercises a refresh.
    let scope = UserScope::for_username("octocat");
    hub.login(
        &scope,
        &SessionId::new("harness-session"),
        IssuedToken {
            access_token: Secret::new("ghu_harness"),
            refresh_token: Secret::new("ghr_harness"),
            expires_at: Utc::now() - TimeDelta::seconds(1),
        },
    )
    .await?;

    let cancel = CancellationToken::new();
    let (tick_tx, tick_rx) = clock::tick_channel(TICK_CHANNEL_CAPACITY);
    let clock = clock::spawn_from_config(&config.clock, tick_tx, cancel.child_token()).await?;
    let runner = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.run(tick_rx).await })
    };

    tracing::info!(secs = args.secs, "harness running");
    let deadline = tokio::time::sleep(Duration::from_secs(args.secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("skipped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    clock.shutdown();
    hub.shutdown();
    let _ = runner.await;
    tracing::info!("harness finished");
    Ok(())
}
