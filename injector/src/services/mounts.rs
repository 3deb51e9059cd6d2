//! Mount table inspection and filesystem statistics

use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;

use crate::error::{FaultError, FaultResult};

pub const MOUNTINFO: &str = "/proc/self/mountinfo";

/// One line of `/proc/self/mountinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|opt| opt == "ro")
    }
}

/// Parse mountinfo content. Field 5 is the mount point (octal escaped),
/// field 6 the per-mount options.
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace().skip(4);
            let mount_point = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                mount_point: PathBuf::from(unescape_octal(mount_point)),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Undo the `\040` style escaping the kernel applies to spaces and tabs
fn unescape_octal(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b));
        if escaped {
            let digits = &raw[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Check that `path` exists, is a mount point and is mounted read-write.
/// Returns the canonical mount point.
pub fn validate_mount_point(path: &Path) -> FaultResult<PathBuf> {
    let content = std::fs::read_to_string(MOUNTINFO).map_err(|e| FaultError::io("read mount table", MOUNTINFO, e))?;
    validate_against(path, &parse_mountinfo(&content))
}

pub fn validate_against(path: &Path, mounts: &[MountEntry]) -> FaultResult<PathBuf> {
    let canonical = path
        .canonicalize()
        .map_err(|_| FaultError::target_absent(path.display().to_string()))?;

    let entry = mounts
        .iter()
        .rev()
        .find(|entry| entry.mount_point == canonical)
        .ok_or_else(|| FaultError::target_absent(format!("{} is not a mount point", canonical.display())))?;

    if entry.is_read_only() {
        return Err(FaultError::invalid_flag(
            "path",
            canonical.display().to_string(),
            "mounted read-only",
        ));
    }
    Ok(canonical)
}

/// Free space figures for the filesystem holding `path`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceStats {
    pub available_bytes: u64,
    pub available_inodes: u64,
}

pub fn space_stats(path: &Path) -> FaultResult<SpaceStats> {
    let stats = statvfs(path).map_err(|errno| FaultError::io("statvfs", path, errno.into()))?;
    Ok(SpaceStats {
        available_bytes: stats.blocks_available() as u64 * stats.fragment_size() as u64,
        available_inodes: stats.files_available() as u64,
    })
}
