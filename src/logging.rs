//! Logger setup shared by the binaries.
//!
//! The library only uses the `log` macros; binaries call [`init`] once.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use env_logger::{Env, Target};

use crate::config::LoggingConfig;

const LOG_DIR: &str = "logs";

/// Writes every record to stderr and to a log file.
struct Tee {
    file: BufWriter<File>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log_file(prefix: &str) -> Result<(PathBuf, File)> {
    fs::create_dir_all(LOG_DIR).context("failed to create log directory")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(LOG_DIR).join(format!("{prefix}_{ts}.log"));
    let file = File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    Ok((path, file))
}

/// Install the global logger. `RUST_LOG` overrides the configured level.
///
/// Returns the log file path when file logging is enabled.
pub fn init(config: &LoggingConfig, prefix: &str) -> Result<Option<PathBuf>> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(&config.level));

    let path = if config.file {
        let (path, file) = open_log_file(prefix)?;
        builder.target(Target::Pipe(Box::new(Tee {
            file: BufWriter::new(file),
        })));
        Some(path)
    } else {
        None
    };

    builder
        .try_init()
        .context("logger already initialised")?;
    Ok(path)
}
