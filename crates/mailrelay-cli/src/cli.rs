use clap::Parser;
use mailrelay_auth::gmail;
use mailrelay_core::config::DEFAULT_CONFIG_PATH;
use std::net::SocketAddr;
use std::path::PathBuf;

/// mailrelay - forward local mail through Gmail using OAuth2
#[derive(Debug, Parser)]
#[command(name = "mailrelay")]
#[command(about = "Local SMTP relay that submits through Gmail with OAuth2")]
#[command(version)]
pub struct Cli {
    /// Obtain OAuth2 credentials and write the configuration file
    #[arg(long, conflicts_with = "run")]
    pub configure: bool,

    /// Start the relay
    #[arg(long)]
    pub run: bool,

    /// Configuration file path
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Address the relay listens on
    #[arg(long, default_value = "127.0.0.1:25")]
    pub listen: SocketAddr,

    /// Host name announced to local clients
    #[arg(long, default_value = "localhost")]
    pub hostname: String,

    /// OAuth2 scope requested when configuring
    #[arg(long, default_value = gmail::MAIL_SCOPE)]
    pub scope: String,

    /// Reuse access tokens until shortly before they expire
    #[arg(long)]
    pub cache_tokens: bool,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

/// What the invocation asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Configure,
    Run,
    Nothing,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.configure {
            Mode::Configure
        } else if self.run {
            Mode::Run
        } else {
            Mode::Nothing
        }
    }
}
