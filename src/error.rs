use std::path::PathBuf;
use std::sync::OnceLock;

use owo_colors::{OwoColorize, colors::css::MediumPurple};
use resext::resext;
use strip_ansi_escapes::strip_str;
use time::macros::format_description;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWriteExt, Stdout, stdout},
    sync::{Mutex, OnceCell},
};

#[resext(
    delimiter = " -> ",
    source_prefix = "Cause: ",
    include_variant = true,
    alloc = true
)]
pub enum RipError {
    IoError(std::io::Error),
    NetworkError(reqwest::Error),
    UrlParseError(url::ParseError),
    ScrapeError(scraper::error::SelectorErrorKind<'static>),
    JsonError(serde_json::Error),
    Custom(String),
}

pub const DEBUG: &str = "[DEBUG]";
pub const INFO: &str = "[INFO]";
pub const WARN: &str = "[WARN]";

#[derive(Debug, Default)]
struct LogSettings {
    file: Option<PathBuf>,
    verbose: bool,
}

static SETTINGS: OnceLock<LogSettings> = OnceLock::new();

/// Installs the log destination and verbosity. Only the first call has any effect;
/// without a call the logger writes to stdout and drops `[DEBUG]` entries.
pub fn configure_logger(file: Option<PathBuf>, verbose: bool) {
    let _ = SETTINGS.set(LogSettings { file, verbose });
}

fn settings() -> &'static LogSettings {
    SETTINGS.get_or_init(LogSettings::default)
}

enum Logger {
    Stdout(Mutex<Stdout>),
    File(Mutex<File>),
}

static LOGGER: OnceCell<Logger> = OnceCell::const_new();

async fn init_logger() -> &'static Logger {
    LOGGER
        .get_or_init(async || {
            if let Some(path) = &settings().file {
                let res = OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .create(true)
                    .open(path)
                    .await;

                match res {
                    Ok(file) => Logger::File(Mutex::new(file)),
                    Err(err) => {
                        println!(
                            "{} Failed to open log file: {}\nCause: {}",
                            WARN.fg::<MediumPurple>(),
                            path.to_string_lossy().red().bold(),
                            err
                        );

                        Logger::Stdout(Mutex::new(stdout()))
                    }
                }
            } else {
                Logger::Stdout(Mutex::new(stdout()))
            }
        })
        .await
}

pub const LOG_TIMESTAMP_FORMAT: &[time::format_description::BorrowedFormatItem] = format_description!(
    "[year]-[month padding:zero]-[day padding:zero] [hour]:[minute]:[second].[subsecond digits:3]"
);

async fn write_entry(level: &'static str, message: String) -> Res<()> {
    if level == DEBUG && !settings().verbose {
        return Ok(());
    }

    let timestamp: String = time::OffsetDateTime::now_utc()
        .to_offset(time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC))
        .format(&LOG_TIMESTAMP_FORMAT)
        .map_err(|_| String::from("Format Failure"))
        .context("Failed to format timestamp for log")?;

    match init_logger().await {
        Logger::File(mutex_wtr) => {
            let mut wtr = mutex_wtr.lock().await;

            let log = format!("{} {}:\n{}\n\n", timestamp, level, strip_str(message));

            wtr.write_all(log.as_bytes())
                .await
                .with_context(format_args!("Failed to write log at: {}", timestamp))
        }

        Logger::Stdout(mutex_stdout) => {
            let mut stdout = mutex_stdout.lock().await;

            let log = format!(
                "{} {}:\n{}\n\n",
                timestamp.yellow(),
                level.fg::<MediumPurple>(),
                message
            );

            stdout
                .write_all(log.as_bytes())
                .await
                .with_context(format_args!("Failed to write log at: {}", timestamp))
        }
    }
}

pub trait Log<T> {
    async fn log(self, level: &'static str) -> Res<Option<T>>;
}

/// Downgrades an error to a log entry. `Ok` passes through as `Some`, `Err` is logged
/// and becomes `None`; only a failure to write the log itself is returned.
impl<T> Log<T> for Res<T> {
    async fn log(self, level: &'static str) -> Res<Option<T>> {
        match self {
            Ok(ok) => Ok(Some(ok)),
            Err(err) => {
                write_entry(level, err.to_string()).await?;
                Ok(None)
            }
        }
    }
}

impl Log<()> for String {
    async fn log(self, level: &'static str) -> Res<Option<()>> {
        write_entry(level, self).await?;
        Ok(None)
    }
}
