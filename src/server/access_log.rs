//! Access logging in Common Log Format.
//!
//! The sink is opened before chroot. Records are written by whichever worker
//! completed the request, one line each, under a mutex.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use tracing::warn;

use super::timestamp::ClfTimestamp;
use crate::config::AccessLogTarget;

/// One completed request.
#[derive(Debug, Clone)]
pub struct AccessRecord<'a> {
    pub remote: IpAddr,
    pub user: Option<&'a str>,
    pub time: SystemTime,
    pub request_line: &'a str,
    pub status: u16,
    pub bytes: u64,
}

/// Format a record as `host - user [time] "request" status bytes`.
pub fn format_record(record: &AccessRecord<'_>) -> String {
    let bytes = if record.bytes == 0 {
        "-".to_string()
    } else {
        record.bytes.to_string()
    };
    format!(
        "{} - {} [{}] \"{}\" {} {}\n",
        record.remote,
        record.user.unwrap_or("-"),
        ClfTimestamp::new(record.time),
        record.request_line.escape_default(),
        record.status,
        bytes
    )
}

enum Sink {
    Stdout(io::Stdout),
    File(BufWriter<File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stdout(s) => s.write(buf),
            Sink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout(s) => s.flush(),
            Sink::File(f) => f.flush(),
        }
    }
}

pub struct AccessLog {
    sink: Mutex<Sink>,
    flush_each: bool,
}

impl AccessLog {
    /// Open the configured target. Files are appended to and created if needed.
    pub fn open(target: &AccessLogTarget, flush_each: bool) -> io::Result<Self> {
        let sink = match target {
            AccessLogTarget::Stdout => Sink::Stdout(io::stdout()),
            AccessLogTarget::File(path) => Sink::File(BufWriter::new(open_append(path)?)),
        };
        Ok(Self {
            sink: Mutex::new(sink),
            flush_each,
        })
    }

    pub fn write(&self, record: &AccessRecord<'_>) {
        let line = format_record(record);
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let result = sink.write_all(line.as_bytes()).and_then(|_| {
            if self.flush_each {
                sink.flush()
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to write access log");
        }
    }

    pub fn flush(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = sink.flush() {
            warn!(error = %e, "Failed to flush access log");
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
