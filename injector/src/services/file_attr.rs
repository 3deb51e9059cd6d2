//! Inode attribute flags via the `FS_IOC_GETFLAGS` / `FS_IOC_SETFLAGS` ioctls

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{FaultError, FaultResult};

/// `FS_IMMUTABLE_FL` from linux/fs.h
pub const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

mod ioctl {
    // The request numbers encode a long, but the kernel transfers an int
    nix::ioctl_read_bad!(fs_ioc_getflags, 0x8008_6601, libc::c_int);
    nix::ioctl_write_ptr_bad!(fs_ioc_setflags, 0x4008_6602, libc::c_int);
}

fn open(path: &Path) -> FaultResult<File> {
    File::open(path).map_err(|e| FaultError::io("open for attribute ioctl", path, e))
}

pub fn get_flags(path: &Path) -> FaultResult<libc::c_int> {
    let file = open(path)?;
    let mut flags: libc::c_int = 0;
    // SAFETY: fd is open for the duration of the call and flags is a valid c_int
    unsafe { ioctl::fs_ioc_getflags(file.as_raw_fd(), &mut flags) }
        .map_err(|errno| FaultError::io("read attribute flags", path, errno.into()))?;
    Ok(flags)
}

fn set_flags(path: &Path, flags: libc::c_int) -> FaultResult<()> {
    let file = open(path)?;
    // SAFETY: fd is open for the duration of the call and flags outlives it
    unsafe { ioctl::fs_ioc_setflags(file.as_raw_fd(), &flags) }
        .map_err(|errno| FaultError::io("write attribute flags", path, errno.into()))?;
    Ok(())
}

pub fn is_immutable(path: &Path) -> FaultResult<bool> {
    Ok(get_flags(path)? & FS_IMMUTABLE_FL != 0)
}

/// Set or clear the immutable attribute, leaving other flags untouched
pub fn set_immutable(path: &Path, immutable: bool) -> FaultResult<()> {
    let flags = get_flags(path)?;
    let updated = if immutable {
        flags | FS_IMMUTABLE_FL
    } else {
        flags & !FS_IMMUTABLE_FL
    };
    if updated == flags {
        return Ok(());
    }
    tracing::info!(
        "{} immutable attribute on {}",
        if immutable { "Setting" } else { "Clearing" },
        path.display()
    );
    set_flags(path, updated)
}
