mod commands;
mod ui;

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use commands::WindowArgs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "worldview")]
#[command(about = "Builds a model of a cluster from its metrics and checks its health", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a project configuration file
    Validate {
        /// Path to the configuration (YAML, TOML, or JSON)
        config: PathBuf,
    },

    /// Print the query catalogue
    Queries {
        /// Apply the extra selector of this configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only queries whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Build a world and print its applications and nodes
    World {
        config: PathBuf,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Build a world and run the health checks
    Checks {
        config: PathBuf,

        #[command(flatten)]
        window: WindowArgs,

        /// Show passing checks too
        #[arg(short, long)]
        all: bool,

        /// Also evaluate the 3d/6h burn rate rule
        #[arg(long)]
        slow_burn: bool,

        /// Write the audit to a file (.json or markdown)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluate the alerting rules over consecutive windows
    Alerts {
        config: PathBuf,

        #[command(flatten)]
        window: WindowArgs,

        /// Number of evaluations
        #[arg(long, default_value_t = 1)]
        ticks: u32,

        /// Time between evaluations
        #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
        interval: std::time::Duration,
    },

    /// Keep the metrics cache of a project fresh until interrupted
    Watch {
        config: PathBuf,

        /// Expose the process metrics on this port
        #[arg(short, long)]
        metrics_port: Option<u16>,
    },
}

fn init_logging(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let (file, guard) = match &cli.log_file {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("Invalid log file: {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(file.is_none());
    match (cli.log_format, file) {
        (LogFormat::Text, None) => builder.with_writer(std::io::stderr).init(),
        (LogFormat::Text, Some(file)) => builder.with_writer(std::io::stderr.and(file)).init(),
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).init(),
        (LogFormat::Json, Some(file)) => builder.json().with_writer(std::io::stderr.and(file)).init(),
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    match cli.command {
        Commands::Validate { config } => {
            commands::validate::execute(config).await?;
        }

        Commands::Queries { config, filter } => {
            commands::queries::execute(config, filter).await?;
        }

        Commands::World { config, window } => {
            commands::world::execute(config, window).await?;
        }

        Commands::Checks {
            config,
            window,
            all,
            slow_burn,
            output,
        } => {
            commands::checks::execute(config, window, all, slow_burn, output).await?;
        }

        Commands::Alerts {
            config,
            window,
            ticks,
            interval,
        } => {
            commands::alerts::execute(config, window, ticks, interval).await?;
        }

        Commands::Watch { config, metrics_port } => {
            commands::watch::execute(config, metrics_port).await?;
        }
    }

    Ok(())
}
