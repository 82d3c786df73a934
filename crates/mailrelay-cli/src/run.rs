use crate::cli::Cli;
use anyhow::{Context, Result};
use mailrelay_auth::TokenPolicy;
use mailrelay_core::{config, CoreError, InboundListener, ListenerConfig, OutboundRelay};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Remaining lifetime below which a cached access token is refreshed
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Relay until interrupted
pub async fn run(cli: &Cli) -> Result<()> {
    let credentials = match config::load(&cli.config) {
        Ok(credentials) => credentials,
        Err(CoreError::ConfigMissing(path)) => {
            println!(
                "No configuration file at {}. Run mailrelay --configure first.",
                path.display()
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    let policy = if cli.cache_tokens {
        TokenPolicy::Cache {
            skew: TOKEN_EXPIRY_SKEW,
        }
    } else {
        TokenPolicy::AlwaysRefresh
    };

    let identity = credentials.mailbox_identity.clone();
    let relay = OutboundRelay::gmail(credentials, policy).context("Failed to set up OAuth2 client")?;

    let listener_config = ListenerConfig {
        listen_addr: cli.listen,
        hostname: cli.hostname.clone(),
    };
    let listener = InboundListener::bind(listener_config, Arc::new(relay))
        .await
        .with_context(|| format!("Failed to listen on {}", cli.listen))?;
    let handle = listener.start()?;

    info!(
        "Relaying mail received on {} as {} ({:?})",
        handle.local_addr(),
        identity,
        policy
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    info!("Interrupted, stopping listener");
    handle.stop().await?;
    Ok(())
}
