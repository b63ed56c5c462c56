//! Raw system call bindings for Linux
//!
//! Thin wrappers over libc that turn `-1` returns into `io::Error`.

use std::io;

/// Clone flags for namespace creation
pub mod clone_flags {
    /// Create new mount namespace
    pub const CLONE_NEWNS: i32 = libc::CLONE_NEWNS;
    /// Create new network namespace
    pub const CLONE_NEWNET: i32 = libc::CLONE_NEWNET;
    /// Create new PID namespace
    pub const CLONE_NEWPID: i32 = libc::CLONE_NEWPID;
}

/// Mount flags
pub mod mount_flags {
    /// Bind directory at different place
    pub const MS_BIND: libc::c_ulong = libc::MS_BIND;
    /// Recursive mount
    pub const MS_REC: libc::c_ulong = libc::MS_REC;
    /// Change to private propagation
    pub const MS_PRIVATE: libc::c_ulong = libc::MS_PRIVATE;
}

/// Result type for syscall operations
pub type SyscallResult<T> = std::result::Result<T, io::Error>;

/// Clone with namespaces
///
/// The child runs `callback(arg)` on `stack` in its own copy of the address
/// space, so the stack may be freed by the caller once this returns.
pub fn clone_with_namespaces(
    callback: extern "C" fn(*mut libc::c_void) -> i32,
    stack: &mut [u8],
    flags: i32,
    arg: *mut libc::c_void,
) -> SyscallResult<i32> {
    // Stack grows downward on most architectures
    let stack_top = stack.as_mut_ptr().wrapping_add(stack.len());

    let result = unsafe {
        libc::clone(
            callback,
            stack_top as *mut libc::c_void,
            flags | libc::SIGCHLD,
            arg,
        )
    };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

/// Wait for a child process, retrying on EINTR
pub fn waitpid(pid: i32, options: i32) -> SyscallResult<(i32, i32)> {
    loop {
        let mut status: i32 = 0;
        let result = unsafe { libc::waitpid(pid, &mut status, options) };
        if result >= 0 {
            return Ok((result, status));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Decode a wait status into an exit code, mapping signals to `128 + signo`
pub fn exit_code(status: i32) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    }
}

/// Send a signal to a process
pub fn kill(pid: i32, signal: i32) -> SyscallResult<()> {
    let result = unsafe { libc::kill(pid, signal) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_decoding() {
        // Exited with status 3: status word is 3 << 8
        assert_eq!(exit_code(3 << 8), 3);
        assert_eq!(exit_code(0), 0);
        // Killed by SIGKILL
        assert_eq!(exit_code(libc::SIGKILL), 128 + libc::SIGKILL);
    }
}
