use std::env;
use std::ffi::OsStr;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_DIR: &str = "./logs";

/// `LOG_FILE_PATH` wins; otherwise each subcommand gets its own file so a
/// long `process` log is not interleaved with `status` or `export` runs.
fn log_file_for(command: &str, configured: Option<PathBuf>) -> PathBuf {
    configured.unwrap_or_else(|| Path::new(LOG_DIR).join(format!("tensor-duper-{}.log", command)))
}

/// Console output goes to stderr, stdout is left to summaries.
pub fn init_logger(command: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_env("TRACING_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = log_file_for(command, env::var_os("LOG_FILE_PATH").map(PathBuf::from));
    let directory = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .unwrap_or_else(|| OsStr::new("tensor-duper.log"));
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .without_time()
                .with_ansi(io::stderr().is_terminal()),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    debug!("Logging '{}' to {}", command, log_file.display());
    guard
}
