use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("page_seeker={}", level).parse()?)
        .add_directive("warn".parse()?);

    // Progress goes to stdout, so logs stay on stderr
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(log_file)?;
        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}

/// Create a default log file path
pub fn default_log_file() -> PathBuf {
    let mut path = match directories::ProjectDirs::from("com", "page-seeker", "page-seeker") {
        Some(proj_dirs) => proj_dirs.data_dir().to_path_buf(),
        None => PathBuf::from("./logs"),
    };

    path.push("crawler.log");
    path
}
