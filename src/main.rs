use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod core;
mod daemon;
mod parser;
mod providers;

use cli::run::{CodeSource, Overrides};

const LOG_FILE: &str = "washwatch.log";

#[derive(Parser)]
#[command(name = "washwatch")]
#[command(author, version, about = "Polls laundry machine status for many locations, spread evenly over an interval")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CodeArgs {
    /// Inclusive range of location codes, e.g. W000001 W000500
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    range: Option<Vec<String>>,

    /// File with one location code per line
    #[arg(long)]
    file: Option<PathBuf>,

    /// Explicit location codes
    #[arg(long, num_args = 1..)]
    codes: Option<Vec<String>>,
}

impl CodeArgs {
    fn into_source(self) -> CodeSource {
        if let Some(mut range) = self.range {
            let end = range.pop().unwrap_or_default();
            let start = range.pop().unwrap_or_default();
            CodeSource::Range { start, end }
        } else if let Some(path) = self.file {
            CodeSource::File(path)
        } else {
            CodeSource::List(self.codes.unwrap_or_default())
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve location codes, then poll machine status until interrupted
    Run {
        #[command(flatten)]
        codes: CodeArgs,

        /// Polling interval in minutes
        #[arg(short = 'i', long)]
        interval: Option<u64>,

        /// Maximum concurrent requests per batch
        #[arg(short = 'c', long)]
        max_concurrent: Option<usize>,

        /// Directory for location and status data
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Directory for log files
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Config file (default: ~/.config/washwatch/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse accumulated status files for one location into its CSV
    Parse {
        /// Location code
        code: String,

        /// Directory for location and status data
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            codes,
            interval,
            max_concurrent,
            data_dir,
            log_dir,
            config,
        } => {
            let settings = cli::run::load_settings(
                config.as_deref(),
                Overrides {
                    interval_minutes: interval,
                    max_concurrent,
                    data_dir,
                    log_dir,
                },
            )?;
            let _guard = init_logging(Some(&settings.paths.log_dir))?;

            let codes = codes.into_source().load()?;
            cli::run::run(codes, settings).await
        }
        Commands::Parse { code, data_dir } => {
            init_logging(None)?;
            cli::parse::run(&code, &data_dir)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
