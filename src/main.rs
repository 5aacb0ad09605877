use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use chat_relay::config::RelayConfig;

#[derive(Debug, Parser)]
#[command(name = "chat-relay", version, about = "WebSocket relay for application chat events")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: RelayConfig,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay (default).
    Serve,
    /// Print an upgrade token signed with the application secret.
    Token {
        #[arg(long)]
        user_id: i64,
        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dispatch(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => chat_relay::run(&cli.config)
            .await
            .with_context(|| format!("relay on {}", cli.config.addr())),
        Command::Token { user_id, ttl_secs } => {
            anyhow::ensure!(user_id > 0, "user id must be positive");
            let codec = cli.config.token_codec()?;
            println!("{}", codec.issue(user_id, ttl_secs));
            Ok(())
        }
    }
}
