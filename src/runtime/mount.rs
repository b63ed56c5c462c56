//! Mount management for containers
//!
//! The bind mount of a container's private directory is performed by the
//! cloned child before exec, so everything it needs is prepared up front.

use super::syscall::mount_flags;
use crate::error::{BrockerError, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Mounts applied inside a freshly cloned container process
#[derive(Debug)]
pub struct ChildMounts {
    root: CString,
    source: CString,
    target: CString,
}

impl ChildMounts {
    /// Prepare a bind mount of `source` (host directory) onto `target` (app path)
    pub fn new(source: &Path, target: &Path) -> Result<Self> {
        Ok(Self {
            root: CString::new("/").map_err(|e| BrockerError::Runtime(e.to_string()))?,
            source: path_cstring(source)?,
            target: path_cstring(target)?,
        })
    }

    /// Make `/` private, then bind the private directory onto the app path
    ///
    /// Runs between clone and exec: raw syscalls only, no allocation.
    pub fn apply(&self) -> std::result::Result<(), &'static [u8]> {
        let private = unsafe {
            libc::mount(
                std::ptr::null(),
                self.root.as_ptr(),
                std::ptr::null(),
                mount_flags::MS_REC | mount_flags::MS_PRIVATE,
                std::ptr::null(),
            )
        };
        if private < 0 {
            return Err(b"brocker: cannot make / private\n");
        }

        let bind = unsafe {
            libc::mount(
                self.source.as_ptr(),
                self.target.as_ptr(),
                std::ptr::null(),
                mount_flags::MS_BIND,
                std::ptr::null(),
            )
        };
        if bind < 0 {
            return Err(b"brocker: cannot bind-mount container directory\n");
        }

        Ok(())
    }
}

/// Command that detaches the app path inside a running container
pub fn unmount_command(app_mount: &Path) -> String {
    format!("umount {}", app_mount.display())
}

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BrockerError::Runtime(format!("path contains NUL byte: {}", path.display())))
}
