//! Log output: stderr, and optionally a file kept across runs
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::errors::{ErrorKind, OrgBackupError};

/// Writes every record to stderr and appends it to a file
struct Tee {
    /// Log file, opened in append mode
    file: File,
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

/// Logger builder of the tool.
///
/// Records go to stderr without timestamps. With `log_file` they are also
/// appended there, timestamped. `RUST_LOG` overrides `level`.
/// # Errors
/// `Io` if the log file can't be opened
pub fn logger(level: LevelFilter, log_file: Option<&Path>) -> Result<Builder, OrgBackupError> {
    let mut builder = env_logger::builder();
    builder.filter_level(level).format_target(false);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    OrgBackupError::new_with_source(
                        ErrorKind::Io,
                        &format!("Unable to open log file {}", path.display()),
                        e,
                    )
                })?;
            builder
                .format_timestamp_secs()
                .target(Target::Pipe(Box::new(Tee { file })));
        }
        None => {
            builder.format_timestamp(None);
        }
    }
    builder.parse_default_env();
    Ok(builder)
}
