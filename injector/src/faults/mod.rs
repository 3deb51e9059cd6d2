//! Built-in fault catalogue, one module per fault family

pub mod cpu;
pub mod file;
pub mod filesystem;
pub mod memory;
pub mod process;
pub mod stress;
pub mod system;

use std::path::{Path, PathBuf};

use shared::{FaultType, Flags};

use crate::error::{FaultError, FaultResult};
use crate::registry::Registry;

/// Register every built-in fault type
pub fn register_all(registry: &mut Registry) {
    cpu::register(registry);
    memory::register(registry);
    file::register(registry);
    filesystem::register(registry);
    process::register(registry);
    system::register(registry);
}

/// `<path>-<fault>-backup`, or `<dir>/<file name>-<fault>-backup` when a
/// backup directory is given
pub fn backup_path(path: &Path, fault_type: &FaultType, backup_dir: Option<&Path>) -> PathBuf {
    match backup_dir {
        Some(dir) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            dir.join(format!("{name}-{fault_type}-backup"))
        }
        None => PathBuf::from(format!("{}-{}-backup", path.display(), fault_type)),
    }
}

/// Non-empty string flag
pub(crate) fn required_str<'a>(flags: &'a Flags, name: &str) -> FaultResult<&'a str> {
    let value = flags.require(name)?;
    if value.trim().is_empty() {
        return Err(FaultError::invalid_flag(name, value, "must not be empty"));
    }
    Ok(value)
}

/// Rename, falling back to copy and delete across filesystems
pub(crate) async fn move_file(from: &Path, to: &Path) -> FaultResult<()> {
    tracing::info!("Moving {} to {}", from.display(), to.display());
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| FaultError::io("copy across devices", to, e))?;
            tokio::fs::remove_file(from)
                .await
                .map_err(|e| FaultError::io("remove after copy", from, e))
        }
        Err(e) => Err(FaultError::io("rename", from, e)),
    }
}
