//! mailrelay - local SMTP relay with OAuth2 submission

mod cli;
mod configure;
mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Mode};
use mailrelay_auth::gmail;
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose {
        "mailrelay=debug"
    } else {
        "mailrelay=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    match cli.mode() {
        Mode::Configure => {
            let mut input = BufReader::new(tokio::io::stdin());
            let mut output = std::io::stdout();
            configure::configure(
                &mut input,
                &mut output,
                &cli.config,
                &cli.scope,
                gmail::oauth2_config,
            )
            .await
        }
        Mode::Run => run::run(&cli).await,
        Mode::Nothing => {
            Cli::command().print_help()?;
            println!();
            println!("Nothing to do, exiting.");
            Ok(())
        }
    }
}
