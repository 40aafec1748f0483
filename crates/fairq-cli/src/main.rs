use clap::{Parser, Subcommand};

mod client;
mod commands;

#[derive(Parser)]
#[command(
    name = "fairq",
    about = "fairq — job priority inspection",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the priority factor breakdown for pending jobs.
    ///
    /// By default the weighted factor components are shown and columns
    /// whose weight is zero are hidden. Use --normalized for the raw
    /// [0,1] factor values and --long for every column regardless of
    /// weight.
    Prio {
        /// Controller address (host:port).
        #[arg(long, default_value = "127.0.0.1:7321")]
        host: String,
        /// Comma-separated job ids to report on.
        #[arg(long)]
        jobs: Option<String>,
        /// Comma-separated user ids to report on.
        #[arg(long)]
        users: Option<String>,
        /// Print the normalized factor values instead of the weighted
        /// components.
        #[arg(long)]
        normalized: bool,
        /// Include all factor columns, even for zero weights.
        #[arg(long)]
        long: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fairq=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prio {
            host,
            jobs,
            users,
            normalized,
            long,
        } => commands::prio::run(&host, jobs.as_deref(), users.as_deref(), normalized, long).await,
    }
}
