//! Container process management
//!
//! Launches a command in fresh PID, mount and network namespaces with its
//! output captured in the container's log file.

use super::mount::{path_cstring, ChildMounts};
use super::namespace::{clone_flags_for, CONTAINER_NAMESPACES};
use super::syscall;
use crate::error::{BrockerError, Result};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Stack size for the cloned child before it execs
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Everything needed to start one container process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Container identity
    pub name: String,
    /// Host directory bind-mounted into the container
    pub directory: PathBuf,
    /// In-container mount point for `directory`
    pub app_mount: PathBuf,
    /// Arguments (first is the executable)
    pub args: Vec<String>,
    /// File receiving the process's stdout and stderr
    pub log_path: PathBuf,
}

/// Starts, awaits and kills container processes
pub trait Launcher: Send + Sync {
    /// Start the process and return its host pid
    fn launch(&self, spec: &LaunchSpec) -> Result<u32>;

    /// Block until the process exits and return its exit code
    fn wait(&self, pid: u32) -> Result<i32>;

    /// Kill the process; a process that is already gone is not an error
    fn kill(&self, pid: u32) -> Result<()>;
}

/// `Launcher` that clones into new namespaces directly
pub struct NamespaceLauncher;

/// State handed to the cloned child
struct ChildContext {
    log_fd: RawFd,
    mounts: ChildMounts,
    program: CString,
    // Owns the strings `argv_ptrs` points into.
    _args: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
}

impl ChildContext {
    fn new(spec: &LaunchSpec, log: &File) -> Result<Self> {
        let program = path_cstring(&resolve_program(&spec.args[0])?)?;
        let args = spec
            .args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| BrockerError::Runtime("argument contains NUL byte".to_string()))?;
        let mut argv_ptrs: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        Ok(Self {
            log_fd: log.as_raw_fd(),
            mounts: ChildMounts::new(&spec.directory, &spec.app_mount)?,
            program,
            _args: args,
            argv_ptrs,
        })
    }
}

/// Entry point of the cloned child
///
/// Only async-signal-safe calls happen here; the parent may be multi-threaded.
extern "C" fn child_main(arg: *mut libc::c_void) -> libc::c_int {
    let ctx = unsafe { &*(arg as *const ChildContext) };

    unsafe {
        if libc::dup2(ctx.log_fd, libc::STDOUT_FILENO) < 0
            || libc::dup2(ctx.log_fd, libc::STDERR_FILENO) < 0
        {
            libc::_exit(126);
        }

        if let Err(message) = ctx.mounts.apply() {
            child_fail(message);
        }

        libc::execv(ctx.program.as_ptr(), ctx.argv_ptrs.as_ptr());
        child_fail(b"brocker: exec failed\n")
    }
}

fn child_fail(message: &[u8]) -> ! {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr() as *const libc::c_void,
            message.len(),
        );
        libc::_exit(127)
    }
}

/// Record a failed start in the container's own log
fn note_start_failure(log: &mut impl Write, spec: &LaunchSpec, err: &dyn std::fmt::Display) {
    if let Err(e) = writeln!(log, "brocker: failed to start {}: {}", spec.args.join(" "), err) {
        tracing::warn!("Cannot write log of {}: {}", spec.name, e);
    }
}

impl Launcher for NamespaceLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        if spec.args.is_empty() {
            return Err(BrockerError::Validation("command is empty".to_string()));
        }

        // The mount point has to exist in the host filesystem the child inherits.
        std::fs::create_dir_all(&spec.app_mount)?;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)?;

        let ctx = match ChildContext::new(spec, &log) {
            Ok(ctx) => ctx,
            Err(e) => {
                note_start_failure(&mut log, spec, &e);
                return Err(e);
            }
        };

        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        let flags = clone_flags_for(&CONTAINER_NAMESPACES);
        let cloned = syscall::clone_with_namespaces(
            child_main,
            &mut stack,
            flags,
            &ctx as *const ChildContext as *mut libc::c_void,
        );

        match cloned {
            Ok(pid) => {
                tracing::debug!("Cloned container {} as pid {}", spec.name, pid);
                Ok(pid as u32)
            }
            Err(e) => {
                note_start_failure(&mut log, spec, &e);
                Err(BrockerError::Provisioning(format!(
                    "failed to clone container {}: {}",
                    spec.name, e
                )))
            }
        }
    }

    fn wait(&self, pid: u32) -> Result<i32> {
        let (_, status) = syscall::waitpid(pid as i32, 0)
            .map_err(|e| BrockerError::Runtime(format!("Failed to wait for {}: {}", pid, e)))?;
        Ok(syscall::exit_code(status))
    }

    fn kill(&self, pid: u32) -> Result<()> {
        match syscall::kill(pid as i32, libc::SIGKILL) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
            Err(e) => Err(BrockerError::Runtime(format!("Failed to kill {}: {}", pid, e))),
        }
    }
}

/// Resolve a bare program name against `PATH`
fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| BrockerError::Provisioning(format!("{} not found in PATH", program)))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_program() {
        assert_eq!(
            resolve_program("/bin/sleep").unwrap(),
            PathBuf::from("/bin/sleep")
        );
    }

    #[test]
    fn test_resolve_bare_program_from_path() {
        let resolved = resolve_program("sh").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_resolve_missing_program() {
        assert!(resolve_program("definitely-not-a-real-binary-xyz").is_err());
    }

    struct BrokenLog;

    impl Write for BrokenLog {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sleep_spec(dir: &Path) -> LaunchSpec {
        LaunchSpec {
            name: "abcd1234".to_string(),
            directory: dir.to_path_buf(),
            app_mount: dir.join("app"),
            args: vec!["/bin/sleep".to_string(), "1".to_string()],
            log_path: dir.join("output.log"),
        }
    }

    #[test]
    fn test_start_failure_is_logged_to_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = Vec::new();
        note_start_failure(&mut log, &sleep_spec(dir.path()), &"no such file");
        assert_eq!(
            String::from_utf8(log).unwrap(),
            "brocker: failed to start /bin/sleep 1: no such file\n"
        );
    }

    #[test]
    fn test_start_failure_survives_broken_log() {
        let dir = tempfile::tempdir().unwrap();
        note_start_failure(&mut BrokenLog, &sleep_spec(dir.path()), &"no such file");
    }

    #[test]
    fn test_launch_rejects_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            name: "abcd1234".to_string(),
            directory: dir.path().to_path_buf(),
            app_mount: dir.path().join("app"),
            args: Vec::new(),
            log_path: dir.path().join("output.log"),
        };
        assert!(matches!(
            NamespaceLauncher.launch(&spec),
            Err(BrockerError::Validation(_))
        ));
    }

    #[test]
    fn test_kill_missing_process_is_ok() {
        assert!(NamespaceLauncher.kill(u32::MAX / 2).is_ok());
    }
}
