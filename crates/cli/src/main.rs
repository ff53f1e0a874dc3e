//! Lantern CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Talk to the agent in the terminal
//! - `crawl`: Crawl a URL within the caller's budget and print the nodes
//! - `config`: Show, locate, or validate the configuration

use clap::{Parser, Subcommand};

mod channel;
mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "lantern",
    about = "Lantern: a conversational agent grounded in live web content",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Identity the messages are attributed to
        #[arg(short, long, default_value = "local_user")]
        user: String,

        /// Conversation thread to continue
        #[arg(short, long, default_value = "cli_session")]
        thread: String,

        /// Simulate a group channel: only lines starting with '@' address the agent
        #[arg(short, long)]
        group: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Crawl a URL and print what was fetched
    Crawl {
        url: String,

        /// Identity the fetches are charged to
        #[arg(short, long, default_value = "local_user")]
        user: String,

        /// Also print a grounded summary of the crawled text
        #[arg(short, long)]
        summarize: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            user,
            thread,
            group,
            message,
        } => {
            let session = channel::Session { user, thread, group };
            commands::chat::run(session, message).await?
        }
        Commands::Crawl { url, user, summarize } => commands::crawl::run(&url, &user, summarize).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
