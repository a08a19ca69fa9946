use anyhow::Result;
use clap::Parser;
use restyle_gen::{Config, GenError};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "restyle", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Replicate API token (overrides the config file and RESTYLE_* env vars)
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Repaint a photo in an art style
    ///
    /// The photo is sent as the control image of a depth-conditioned
    /// generation model. Calls to the provider are spaced by the configured
    /// minimum interval, and rate-limited calls are retried after the
    /// provider's retry hint. If the provider does not finish inline, the
    /// prediction is polled until it succeeds, fails or the poll budget
    /// runs out.
    ///
    /// The prompt comes from --prompt, else from the style file's `prompt`,
    /// else from its `description`.
    ///
    /// Output: the finished transfer as JSON, including the output image URL.
    Transfer {
        /// Photo to repaint: a local file (jpg, png, webp, gif) or an http(s) URL
        #[arg(long)]
        image: String,

        /// Prompt describing the target style
        #[arg(long)]
        prompt: Option<String>,

        /// JSON file describing the style (name, prompt, description, era, ...)
        #[arg(long)]
        style: Option<PathBuf>,
    },
    /// Fetch a prediction once and print it
    Status {
        /// Prediction id
        id: String,
    },
    /// Wait for a prediction to finish and print it
    Wait {
        /// Prediction id
        id: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Create the config file with defaults
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{}", describe_error(&err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config::show_config()?,
            ConfigCommands::Init => commands::config::init_config()?,
            ConfigCommands::Path => commands::config::show_path()?,
        },
        Commands::Transfer {
            image,
            prompt,
            style,
        } => {
            let config = load_config(cli.token)?;
            commands::run_transfer(&config, &image, prompt, style).await?;
        }
        Commands::Status { id } => {
            let config = load_config(cli.token)?;
            commands::show_status(&config, &id).await?;
        }
        Commands::Wait { id } => {
            let config = load_config(cli.token)?;
            commands::wait_for(&config, &id).await?;
        }
    }

    Ok(())
}

fn load_config(token: Option<String>) -> Result<Config> {
    // Fall back to the token name the provider's own tooling uses
    let token = token.or_else(|| std::env::var("REPLICATE_API_TOKEN").ok());
    match token {
        Some(token) => Config::load_with_token(token),
        None => Config::load(),
    }
}

/// Render an error for the terminal, tagging generation errors with their
/// HTTP-equivalent status.
fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<GenError>() {
        Some(gen) => format!("Error ({}): {}", gen.http_status(), gen),
        None => format!("Error: {:#}", err),
    }
}
