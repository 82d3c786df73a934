//! Interactive one-time OAuth2 setup

use anyhow::{bail, Context, Result};
use mailrelay_auth::{CredentialRecord, OAuth2Client, OAuth2Config};
use mailrelay_core::config;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::info;

/// Prompt for client credentials, run the consent flow and save the result
///
/// `endpoints` builds the provider configuration from the entered client ID
/// and secret.
pub async fn configure<R, W, F>(
    input: &mut R,
    output: &mut W,
    path: &Path,
    scope: &str,
    endpoints: F,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    F: FnOnce(&str, &str) -> OAuth2Config,
{
    let client_id = prompt(input, output, "Client ID: ").await?;
    let client_secret = prompt(input, output, "Client secret: ").await?;
    let mailbox_identity = prompt(input, output, "Gmail address: ").await?;

    let client = OAuth2Client::new(endpoints(&client_id, &client_secret))?;
    let url = client.authorization_url(scope)?;

    writeln!(output, "Visit this URL to authorize access:")?;
    writeln!(output, "{}", url)?;
    let code = prompt(input, output, "Enter verification code: ").await?;

    let tokens = client
        .exchange_code(&code)
        .await
        .context("Authorization code exchange failed")?;
    info!(
        "Received tokens for {}, access token valid for {}s",
        mailbox_identity,
        tokens.access_token.expires_in.as_secs()
    );

    let record = CredentialRecord {
        mailbox_identity,
        client_id,
        client_secret,
        refresh_token: tokens.refresh_token,
    };
    config::save(path, &record)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    writeln!(output, "Configuration file saved.")?;
    Ok(())
}

async fn prompt<R, W>(input: &mut R, output: &mut W, label: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(output, "{}", label)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        bail!("Input closed while waiting for {}", label.trim_end_matches([':', ' ']));
    }

    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} cannot be empty", label.trim_end_matches([':', ' ']));
    }
    Ok(value)
}
