use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;
use teelog::{
    format_table, print_with_color, Compression, Level, LogSession, RetentionAction,
    RetentionEngine, SessionConfig, TableData, Tone,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n  TEELOG_LOG_DIR, TEELOG_COMPRESSION, TEELOG_COMPRESSION_LEVEL,\n  TEELOG_SINGLE_LOG_PER_DAY, TEELOG_SUPPRESS_PRINTOUT, TEELOG_DISABLE_COLORS, NO_COLOR\n\n  RUST_LOG controls the tool's own diagnostics (default: warn)."
)]
struct Cli {
    /// Configuration file path
    #[arg(long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    /// Root directory holding <name>_log
    #[arg(long, help = "Directory for log files")]
    log_dir: Option<PathBuf>,

    /// Program name used for the log directory and file names
    #[arg(long, help = "Program name for log files")]
    name: Option<String>,

    /// Print [LEVEL] prefixes instead of colors
    #[arg(long, help = "Disable colored output")]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a message through a session
    Log {
        /// debug, info, warning, error or critical
        level: String,

        /// Message text
        #[arg(required = true)]
        message: Vec<String>,

        /// Also echo the message to the terminal
        #[arg(long)]
        tee: bool,
    },

    /// Measure record throughput
    Bench {
        /// Records to write
        #[arg(long, default_value_t = 100_000)]
        records: u64,

        /// none, gzip, bzip2 or xz
        #[arg(long)]
        compression: Option<Compression>,

        /// Codec level or xz preset
        #[arg(long)]
        level: Option<u32>,

        /// Write records as raw bytes
        #[arg(long)]
        binary: bool,
    },

    /// Classify and clean up dated log directories
    Sweep {
        #[arg(long)]
        delete_after_years: Option<u32>,

        #[arg(long)]
        compress_after_months: Option<u32>,

        /// Only print the decisions
        #[arg(long)]
        dry_run: bool,
    },

    /// Format delimited text or JSON as an aligned table
    Table {
        /// Input file; stdin when omitted
        input: Option<PathBuf>,

        #[arg(long, default_value = "\t")]
        delimiter: String,

        /// Parse the input as JSON
        #[arg(long)]
        json: bool,

        /// Comma-separated header replacing the first row
        #[arg(long, value_delimiter = ',')]
        header: Option<Vec<String>>,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = SessionConfig::load(cli.config.as_deref())
        .context("Failed to load teelog configuration")?;
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(name) = &cli.name {
        config.name = Some(name.clone());
    }
    if cli.no_color {
        config.disable_colors = true;
    }

    match cli.command {
        Command::Log {
            level,
            message,
            tee,
        } => {
            let log = LogSession::new(config).context("Failed to start log session")?;
            let level = Level::from_name(&level);
            let message = message.join(" ");
            if tee {
                log.tee(level, message);
            } else {
                log.log(level, message);
            }
            log.finish_maintenance();
        }
        Command::Bench {
            records,
            compression,
            level,
            binary,
        } => {
            if let Some(compression) = compression {
                config.compression = compression;
            }
            if level.is_some() {
                config.compression_level = level;
            }
            config.binary_mode = binary;
            run_bench(config, records)?;
        }
        Command::Sweep {
            delete_after_years,
            compress_after_months,
            dry_run,
        } => {
            if let Some(years) = delete_after_years {
                config.retention.delete_after_years = years;
            }
            if let Some(months) = compress_after_months {
                config.retention.compress_after_months = months;
            }
            run_sweep(&config, dry_run)?;
        }
        Command::Table {
            input,
            delimiter,
            json,
            header,
        } => {
            let text = match &input {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut text = String::new();
                    std::io::stdin()
                        .read_to_string(&mut text)
                        .context("Failed to read stdin")?;
                    text
                }
            };
            let data = if json {
                TableData::from_json_str(&text).context("Input is not valid JSON")?
            } else {
                TableData::Text(text)
            };
            print!("{}", format_table(data, &delimiter, header.as_deref()));
        }
        Command::Config { save } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => SessionConfig::default_config_path()?,
            };
            if save {
                config
                    .save(Some(&path))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), "Configuration saved");
            }
            println!("# {}", path.display());
            println!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
    }

    Ok(())
}

fn run_bench(config: SessionConfig, records: u64) -> Result<()> {
    let log = LogSession::new(config).context("Failed to start log session")?;
    log.tee_info("Starting benchmark");

    let started = Instant::now();
    for i in 0..records {
        log.info(format!("This is a test message: {}", i));
    }
    let elapsed = started.elapsed();

    log.tee_info(format!(
        "Wrote {} records in {:.2} seconds ({:.0} records/s)",
        records,
        elapsed.as_secs_f64(),
        records as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    ));
    if let Some(path) = log.log_file_path() {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        log.tee_ok(format!("{} is {} bytes", path.display(), size));
    }
    if log.write_error_count() > 0 {
        log.tee_error(format!(
            "{} writes failed, last: {}",
            log.write_error_count(),
            log.last_write_error().unwrap_or_default()
        ));
    }
    log.finish_maintenance();
    Ok(())
}

fn run_sweep(config: &SessionConfig, dry_run: bool) -> Result<()> {
    let logs_dir = config
        .log_dir
        .join(format!("{}_log", config.resolved_name()));
    let mut engine = RetentionEngine::new(&config.retention);

    let plan = if dry_run {
        engine.plan(&logs_dir, None)
    } else {
        engine.sweep(&logs_dir, None)
    }
    .with_context(|| format!("Failed to scan {}", logs_dir.display()))?;

    let mut rows = vec![vec![
        "entry".to_string(),
        "age (days)".to_string(),
        "action".to_string(),
    ]];
    for (candidate, action) in &plan.decisions {
        rows.push(vec![
            candidate.name.clone(),
            (candidate.age.as_secs() / 86_400).to_string(),
            format!("{:?}", action).to_lowercase(),
        ]);
    }
    for path in &plan.unwritable {
        rows.push(vec![
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            String::new(),
            format!("{:?}", RetentionAction::Ignore).to_lowercase(),
        ]);
    }
    print!("{}", format_table(rows, "\t", None));

    if !dry_run {
        for outcome in engine.finish() {
            match outcome.result {
                Ok(()) => print_with_color(
                    &format!("{:?} done", outcome.job),
                    Tone::OkGreen,
                    config.disable_colors,
                ),
                Err(e) => print_with_color(
                    &format!("{:?} failed: {}", outcome.job, e),
                    Tone::Error,
                    config.disable_colors,
                ),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bench_arguments() {
        let cli = Cli::try_parse_from([
            "teelog",
            "--log-dir",
            "/tmp/x",
            "bench",
            "--records",
            "10",
            "--compression",
            "bz2",
        ])
        .unwrap();
        match cli.command {
            Command::Bench {
                records,
                compression,
                ..
            } => {
                assert_eq!(records, 10);
                assert_eq!(compression, Some(Compression::Bzip2));
            }
            _ => panic!("expected bench"),
        }
    }

    #[test]
    fn test_sweep_dry_run_leaves_entries() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let old = temp_dir.path().join("demo_log").join("2001-01-01");
        std::fs::create_dir_all(&old).unwrap();

        let mut config = SessionConfig::new("demo");
        config.log_dir = temp_dir.path().to_path_buf();
        run_sweep(&config, true).unwrap();
        assert!(old.exists());
    }
}
