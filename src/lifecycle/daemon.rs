//! Background detach and pidfile handling.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::DetachMode;

/// Whether startup should fork into the background.
pub fn should_detach(mode: DetachMode) -> bool {
    match mode {
        DetachMode::Never => false,
        DetachMode::Always => true,
        DetachMode::Auto => unsafe { libc::isatty(libc::STDIN_FILENO) == 0 },
    }
}

/// Opened before chroot; `/dev/null` may not exist inside the root.
pub fn open_dev_null() -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open("/dev/null")
}

/// Fork, let the parent exit, and start a new session in the child.
///
/// Must run before any threads are started.
pub fn detach(dev_null: &File) -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => unsafe { libc::_exit(0) },
    }
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    let fd = dev_null.as_raw_fd();
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Exclusively created pidfile, written once the final pid is known.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Create the file; an existing pidfile means another instance may run.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_pid(&mut self, pid: u32) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", pid)?;
        self.file.sync_all()
    }

    /// Remove the file at shutdown. The path may be unreachable after chroot.
    pub fn remove(self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed pidfile"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove pidfile"),
        }
    }
}
