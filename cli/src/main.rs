use std::{
    env::{self, current_exe},
    io::stdout,
    path::PathBuf,
    time::SystemTime,
};

use anyhow::{Context, Result};
use backend::Settings;
use fern::Dispatch;
use log::{LevelFilter, info};

fn main() -> Result<()> {
    init_logging()?;

    let settings = match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => Settings::load(&path)?,
        None => {
            info!("no settings file given, using defaults");
            Settings::default()
        }
    };

    let summaries = backend::run(&settings)?;
    for summary in &summaries {
        info!(
            "{}: {} frames -> {}, {}",
            summary.source.display(),
            summary.frames,
            summary.tracked.display(),
            summary.tactical.display()
        );
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_dir = current_exe()?
        .parent()
        .map(PathBuf::from)
        .context("executable has no parent directory")?;

    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout())
        .chain(fern::log_file(log_dir.join("log.txt"))?)
        .apply()?;
    log_panics::init();

    Ok(())
}
