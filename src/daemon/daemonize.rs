// Daemonization support for Unix systems

use crate::context::ProcessContext;
use crate::error::{ProcguardError, Result};
use std::io;
use std::path::Path;

/// Outcome of a fork as seen by the calling process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent { child: u32 },
    Child,
}

/// Which side of the fork returned from [`Daemonizer::enter_background`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The launcher; it should exit with a success status.
    Parent { child: u32 },
    /// The detached background process.
    Daemon,
}

/// OS primitives used while detaching from the terminal
pub trait ProcessOps {
    fn fork(&self) -> io::Result<Fork>;
    fn clear_umask(&self);
    fn new_session(&self) -> io::Result<()>;
    fn change_dir(&self, dir: &Path) -> io::Result<()>;
    /// Point stdin, stdout and stderr away from the controlling terminal.
    fn detach_stdio(&self) -> io::Result<()>;
}

/// [`ProcessOps`] backed by the real system calls
#[derive(Debug, Default, Clone, Copy)]
pub struct NixProcessOps;

#[cfg(unix)]
impl ProcessOps for NixProcessOps {
    fn fork(&self) -> io::Result<Fork> {
        use nix::unistd::{fork, ForkResult};

        // SAFETY: called during startup before any other thread exists.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(Fork::Parent {
                child: child.as_raw() as u32,
            }),
            ForkResult::Child => Ok(Fork::Child),
        }
    }

    fn clear_umask(&self) {
        use nix::sys::stat::{umask, Mode};
        umask(Mode::empty());
    }

    fn new_session(&self) -> io::Result<()> {
        nix::unistd::setsid()?;
        Ok(())
    }

    fn change_dir(&self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }

    fn detach_stdio(&self) -> io::Result<()> {
        use nix::unistd::dup2;
        use std::fs::OpenOptions;
        use std::io::Write;
        use std::os::unix::io::AsRawFd;

        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let devnull = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/null")?;
        let fd = devnull.as_raw_fd();

        for target in [
            nix::libc::STDIN_FILENO,
            nix::libc::STDOUT_FILENO,
            nix::libc::STDERR_FILENO,
        ] {
            dup2(fd, target)?;
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl ProcessOps for NixProcessOps {
    fn fork(&self) -> io::Result<Fork> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Daemonization is only supported on Unix systems",
        ))
    }

    fn clear_umask(&self) {}

    fn new_session(&self) -> io::Result<()> {
        Ok(())
    }

    fn change_dir(&self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }

    fn detach_stdio(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Moves the current process into the background
#[derive(Debug, Default)]
pub struct Daemonizer<O = NixProcessOps> {
    ops: O,
}

impl Daemonizer<NixProcessOps> {
    pub fn new() -> Self {
        Self { ops: NixProcessOps }
    }
}

impl<O: ProcessOps> Daemonizer<O> {
    pub fn with_ops(ops: O) -> Self {
        Self { ops }
    }

    #[cfg(test)]
    pub(crate) fn ops(&self) -> &O {
        &self.ops
    }

    /// Fork, detach from the session and terminal, and move to `/`.
    ///
    /// Returns [`Role::Parent`] in the launching process, which must exit
    /// with a success status without touching anything else. Fork and
    /// chdir failures are fatal; setsid and stdio failures are only logged.
    pub fn enter_background(&self, ctx: &ProcessContext) -> Result<Role> {
        match self.ops.fork().map_err(ProcguardError::Fork)? {
            Fork::Parent { child } => return Ok(Role::Parent { child }),
            Fork::Child => {}
        }

        self.ops.clear_umask();

        if let Err(e) = self.ops.new_session() {
            ctx.logger()
                .warn(&format!("Could not create a new session: {}", e));
        }

        self.ops
            .change_dir(Path::new("/"))
            .map_err(ProcguardError::ChangeDir)?;

        // Last message that can reach the terminal
        ctx.logger().info("Background mode ON");

        if let Err(e) = self.ops.detach_stdio() {
            ctx.logger()
                .warn(&format!("Could not detach standard streams: {}", e));
        }

        Ok(Role::Daemon)
    }
}
