mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use settings::Overrides;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rulewatch",
    about = "Evaluate ad-campaign rules against live metrics and stream the actions they trigger",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./rulewatch.yaml when present, else built-in defaults)
    #[arg(long, global = true, env = "RULEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the evaluation loop until Ctrl-C
    Serve,

    /// Evaluate a condition against the given metric values
    Check {
        /// Condition expression, e.g. "spend > 500 && roas < 2"
        condition: String,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        spend: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        ctr: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        roas: f64,
    },

    /// Inspect and validate the effective configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve => {
            settings::resolve(cli.config.as_deref(), &cli.overrides).and_then(cmd::serve::run)
        }
        Commands::Check {
            condition,
            spend,
            ctr,
            roas,
        } => cmd::check::run(&condition, spend, ctr, roas, cli.json),
        Commands::Config { subcommand } => {
            settings::resolve(cli.config.as_deref(), &cli.overrides)
                .and_then(|config| cmd::config::run(&config, subcommand, cli.json))
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
