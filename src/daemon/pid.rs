// PID file management: single-instance lock for the server process

use crate::error::{ProcguardError, Result};
use crate::logger::Logger;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Default PID file location
const DEFAULT_PID_FILE: &str = "/tmp/procguard.pid";

/// Permissions of a freshly created PID file
#[cfg(unix)]
const PID_FILE_MODE: u32 = 0o444;

/// What the lock on a PID file currently says
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidFileState {
    /// No file at the path.
    Absent,
    /// A file exists but nobody holds its lock (left behind by a killed process).
    Unclaimed,
    /// A live process holds the lock. `pid` is `None` if the content is unreadable.
    Claimed { pid: Option<u32> },
}

/// Filesystem and lock primitives used to claim a PID file
pub trait PidFileOps {
    fn exists(&self, path: &Path) -> bool;
    /// `None` if nobody would block a write lock on the existing file,
    /// otherwise `Some` with the holder's pid when the kernel reports one.
    fn lock_holder(&self, path: &Path) -> io::Result<Option<Option<u32>>>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    /// Open for writing, creating with mode 0444, close-on-exec.
    fn create(&self, path: &Path) -> io::Result<File>;
    /// Non-blocking exclusive write lock over the whole file.
    fn try_lock(&self, file: &File) -> io::Result<()>;
    /// Single write call; a short count is reported back rather than retried.
    fn write(&self, file: &File, bytes: &[u8]) -> io::Result<usize>;
}

/// [`PidFileOps`] backed by the real filesystem and `fcntl` locks
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPidFileOps;

impl PidFileOps for FsPidFileOps {
    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    fn lock_holder(&self, path: &Path) -> io::Result<Option<Option<u32>>> {
        let file = File::open(path)?;
        Ok(sys::lock_holder(&file))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[cfg(unix)]
    fn create(&self, path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(nix::libc::O_CLOEXEC)
            .mode(PID_FILE_MODE)
            .open(path)
    }

    #[cfg(not(unix))]
    fn create(&self, path: &Path) -> io::Result<File> {
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    fn try_lock(&self, file: &File) -> io::Result<()> {
        sys::try_lock_exclusive(file)
    }

    fn write(&self, mut file: &File, bytes: &[u8]) -> io::Result<usize> {
        use std::io::Write;

        loop {
            match file.write(bytes) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Location of the server PID file
#[derive(Debug, Clone)]
pub struct PidFile<F = FsPidFileOps> {
    path: PathBuf,
    ops: F,
}

impl PidFile<FsPidFileOps> {
    /// Create a new PID file manager with default path
    pub fn new() -> Self {
        Self::with_path(DEFAULT_PID_FILE)
    }

    /// Create a new PID file manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self::with_ops(path, FsPidFileOps)
    }
}

impl<F: PidFileOps> PidFile<F> {
    pub fn with_ops<P: AsRef<Path>>(path: P, ops: F) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ops,
        }
    }

    /// Get the path to the PID file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim the PID file for the current process.
    ///
    /// An existing file is treated as stale and removed without looking at
    /// its content, unless its lock is still held, in which case this fails
    /// with [`ProcguardError::AlreadyLocked`] and leaves it alone. The
    /// existence check is only an optimisation: exclusivity comes from the
    /// non-blocking lock taken on the new file.
    ///
    /// Outside Linux and Android the check opens and closes a second
    /// descriptor, which drops a classic `fcntl` lock already held by this
    /// process. Do not call it while holding a [`PidFileGuard`] for the path.
    pub fn acquire(&self) -> Result<PidFileGuard> {
        let path = self.path.as_path();

        if self.ops.exists(path) {
            if let Ok(Some(_)) = self.ops.lock_holder(path) {
                return Err(ProcguardError::AlreadyLocked {
                    path: path.to_path_buf(),
                });
            }
            self.ops
                .remove(path)
                .map_err(|source| ProcguardError::StalePidFile {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        let file = self
            .ops
            .create(path)
            .map_err(|source| ProcguardError::PidFileOpen {
                path: path.to_path_buf(),
                source,
            })?;

        // Dropping `file` on any error below closes it and releases the lock
        self.ops.try_lock(&file).map_err(|source| {
            if sys::is_contended(&source) {
                ProcguardError::AlreadyLocked {
                    path: path.to_path_buf(),
                }
            } else {
                ProcguardError::PidFileLock {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let pid = std::process::id();
        let record = pid.to_string();
        let written = self
            .ops
            .write(&file, record.as_bytes())
            .map_err(|source| ProcguardError::PidFileWrite {
                path: path.to_path_buf(),
                source,
            })?;
        if written != record.len() {
            return Err(ProcguardError::ShortWrite {
                path: path.to_path_buf(),
                expected: record.len(),
                written,
            });
        }

        Ok(PidFileGuard {
            path: path.to_path_buf(),
            pid,
            file: Some(file),
        })
    }

    /// Remove the PID file. A failure is logged as a warning and otherwise ignored.
    pub fn release(&self, logger: &dyn Logger) {
        if let Err(e) = self.ops.remove(&self.path) {
            logger.warn(&format!(
                "cannot delete pidfile {}: {}",
                self.path.display(),
                e
            ));
        }
    }

    /// Read the PID recorded in the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| ProcguardError::PidFileRead(e.to_string()))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| ProcguardError::InvalidPid(format!("{:?}: {}", content, e)))
    }

    /// Check the file and its lock without modifying either.
    ///
    /// Same caveat as [`PidFile::acquire`]: outside Linux and Android, calling
    /// this from the process holding the lock releases that lock.
    pub fn probe(&self) -> Result<PidFileState> {
        if !self.ops.exists(&self.path) {
            return Ok(PidFileState::Absent);
        }

        let holder = self
            .ops
            .lock_holder(&self.path)
            .map_err(|e| ProcguardError::PidFileRead(e.to_string()))?;
        match holder {
            None => Ok(PidFileState::Unclaimed),
            Some(holder) => Ok(PidFileState::Claimed {
                pid: self.read().ok().or(holder),
            }),
        }
    }

    /// Check if the PID file exists
    pub fn exists(&self) -> bool {
        self.ops.exists(&self.path)
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the exclusive lock on a PID file until released or dropped
#[must_use = "dropping the guard releases the PID file lock"]
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    pid: u32,
    file: Option<File>,
}

impl PidFileGuard {
    /// PID that was written to the file
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the PID file, then drop the lock.
    ///
    /// The file is unlinked while the lock is still held so that a process
    /// racing to start cannot lock it in between and then lose it.
    pub fn release(mut self, logger: &dyn Logger) {
        self.unlink(logger);
    }

    fn unlink(&mut self, logger: &dyn Logger) {
        if let Some(file) = self.file.take() {
            PidFile::with_path(&self.path).release(logger);
            drop(file);
        }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        self.unlink(&crate::logger::TracingLogger);
    }
}

/// [`FsPidFileOps`] with injectable failures
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct FaultyPidFileOps {
    pub fail_remove: bool,
    pub lock_errno: Option<i32>,
    pub write_errno: Option<i32>,
    pub short_write: Option<usize>,
}

#[cfg(test)]
impl PidFileOps for FaultyPidFileOps {
    fn exists(&self, path: &Path) -> bool {
        FsPidFileOps.exists(path)
    }

    fn lock_holder(&self, path: &Path) -> io::Result<Option<Option<u32>>> {
        FsPidFileOps.lock_holder(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.fail_remove {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        FsPidFileOps.remove(path)
    }

    fn create(&self, path: &Path) -> io::Result<File> {
        FsPidFileOps.create(path)
    }

    fn try_lock(&self, file: &File) -> io::Result<()> {
        match self.lock_errno {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => FsPidFileOps.try_lock(file),
        }
    }

    fn write(&self, file: &File, bytes: &[u8]) -> io::Result<usize> {
        if let Some(errno) = self.write_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        match self.short_write {
            Some(n) => FsPidFileOps.write(file, &bytes[..n.min(bytes.len())]),
            None => FsPidFileOps.write(file, bytes),
        }
    }
}

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg};
    use nix::libc;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn whole_file(kind: libc::c_int) -> libc::flock {
        // SAFETY: `flock` is a plain C struct for which all-zero is valid.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = kind as _;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = 0;
        lock.l_len = 0;
        lock
    }

    // Open file description locks are owned by the open file rather than the
    // process, so closing an unrelated descriptor for the same file does not
    // drop them, and a second open within one process contends like another
    // process would.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn set_lock(file: &File, lock: &libc::flock) -> nix::Result<libc::c_int> {
        fcntl(file.as_raw_fd(), FcntlArg::F_OFD_SETLK(lock))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_lock(file: &File, lock: &libc::flock) -> nix::Result<libc::c_int> {
        fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(lock))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn get_lock(file: &File, lock: &mut libc::flock) -> nix::Result<libc::c_int> {
        fcntl(file.as_raw_fd(), FcntlArg::F_OFD_GETLK(lock))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn get_lock(file: &File, lock: &mut libc::flock) -> nix::Result<libc::c_int> {
        fcntl(file.as_raw_fd(), FcntlArg::F_GETLK(lock))
    }

    /// Non-blocking exclusive write lock over the whole file
    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<()> {
        set_lock(file, &whole_file(libc::F_WRLCK as libc::c_int))?;
        Ok(())
    }

    pub(super) fn is_contended(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error().map(Errno::from_raw),
            Some(Errno::EAGAIN) | Some(Errno::EACCES)
        )
    }

    /// `None` if nobody would block a write lock. Otherwise `Some` with the
    /// holder's pid when the kernel reports one (OFD locks report none).
    pub(super) fn lock_holder(file: &File) -> Option<Option<u32>> {
        let mut lock = whole_file(libc::F_WRLCK as libc::c_int);
        get_lock(file, &mut lock).ok()?;

        if lock.l_type as libc::c_int == libc::F_UNLCK as libc::c_int {
            None
        } else if lock.l_pid > 0 {
            Some(Some(lock.l_pid as u32))
        } else {
            Some(None)
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "PID file locking is only supported on Unix systems",
        ))
    }

    pub(super) fn is_contended(_err: &io::Error) -> bool {
        false
    }

    pub(super) fn lock_holder(_file: &File) -> Option<Option<u32>> {
        None
    }
}
