use anyhow::{bail, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tradegate::cli::{commands, Cli, Commands, OutputMode};
use tradegate::config::{AppConfig, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config: {error}");
        }
        bail!("invalid configuration ({} problems)", errors.len());
    }

    init_logging(&config.logging);
    debug!(dir = %cli.config.display(), "configuration loaded");

    let mode = OutputMode::from_json_flag(cli.json);
    match &cli.command {
        Commands::Backtest {
            data,
            fast,
            slow,
            quantity,
            risk_free,
            fills,
        } => commands::backtest(&config, data, *fast, *slow, *quantity, *risk_free, *fills, mode)?,
        Commands::Multi {
            data,
            lookback,
            window,
            risk_free,
            skipped,
        } => commands::multi(&config, data, *lookback, *window, *risk_free, *skipped, mode)?,
        Commands::Paper {
            data,
            lookback,
            window,
            dry_run,
        } => commands::paper(&config, data, *lookback, *window, *dry_run, mode).await?,
    }

    Ok(())
}

/// Console logging on stderr, plus a daily-rolling file when `logging.dir` is set.
fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let file_layer = cfg.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Warning: Could not create log directory {log_dir} ({e}), file logging disabled");
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".tradegate_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "tradegate.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Flushes on drop; the process owns it until exit
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {log_dir} ({e}), file logging disabled");
                None
            }
        }
    });

    let json_layer = cfg.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!cfg.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init();
}
