//! File faults: corruption, loss, immutability and execute-bit removal
//!
//! Every file fault keeps enough state on disk (a backup copy, the moved
//! file or a saved mode) for a later, separate remove invocation.

use std::io::SeekFrom;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{fault_info, FaultModule, FaultType, OpKind, RunArgs};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{backup_path, move_file, required_str};
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::services::{file_attr, mounts};
use crate::traits::FaultPlugin;

pub const FILE_CORRUPTION: &str = "file-corruption";
pub const FILE_LOST: &str = "file-lost";
pub const FILE_READONLY: &str = "file-readonly";
pub const FILE_UNEXECUTED: &str = "file-unexecuted";

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::File, FILE_CORRUPTION, file_corruption);
    registry.register(FaultModule::File, FILE_LOST, file_lost);
    registry.register(FaultModule::File, FILE_READONLY, file_readonly);
    registry.register(FaultModule::File, FILE_UNEXECUTED, file_unexecuted);
}

fn file_corruption(_: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(FileCorruption::new())
}

fn file_lost(_: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(FileLost::new())
}

fn file_readonly(_: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(FileReadonly::new())
}

fn file_unexecuted(_: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(FileUnexecuted::new())
}

/// Target file and its backup location from `--path` and `--backup-path`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FileTarget {
    path: PathBuf,
    backup: PathBuf,
}

impl FileTarget {
    fn from_args(args: &RunArgs, fault_type: &FaultType) -> FaultResult<Self> {
        let flags = args.flags();
        let path = PathBuf::from(required_str(&flags, "path")?);

        let backup_dir = match flags.get("backup-path").filter(|v| !v.trim().is_empty()) {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_dir() {
                    return Err(FaultError::target_absent(format!("backup directory {}", dir.display())));
                }
                Some(dir)
            }
            None => None,
        };

        let backup = backup_path(&path, fault_type, backup_dir.as_deref());
        Ok(Self { path, backup })
    }

    async fn require_regular_file(&self) -> FaultResult<std::fs::Metadata> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|_| FaultError::target_absent(self.path.display().to_string()))?;
        if !meta.is_file() {
            return Err(FaultError::invalid_flag(
                "path",
                self.path.display().to_string(),
                "not a regular file",
            ));
        }
        Ok(meta)
    }

    fn require_backup(&self) -> FaultResult<()> {
        if self.backup.exists() {
            Ok(())
        } else {
            Err(FaultError::BackupNotFound {
                path: self.backup.clone(),
            })
        }
    }

    fn reject_existing_backup(&self, fault_type: &FaultType) -> FaultResult<()> {
        if self.backup.exists() {
            return Err(FaultError::already_injected(
                fault_type,
                format!("backup {} exists", self.backup.display()),
            ));
        }
        Ok(())
    }
}

/// `length` random alphanumeric bytes
fn random_alphanumeric(length: usize) -> Vec<u8> {
    rand::thread_rng().sample_iter(&Alphanumeric).take(length).collect()
}

/// Overwrites a byte range with random characters, keeping a full backup
pub struct FileCorruption {
    fault_type: FaultType,
    target: FileTarget,
    offset: u64,
    length: u64,
}

impl FileCorruption {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(FILE_CORRUPTION),
            target: FileTarget::default(),
            offset: 0,
            length: 0,
        }
    }
}

impl Default for FileCorruption {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for FileCorruption {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.target = FileTarget::from_args(args, &self.fault_type)?;

        if args.op_kind()? == OpKind::Remove {
            return self.target.require_backup();
        }

        let meta = self.target.require_regular_file().await?;
        self.target.reject_existing_backup(&self.fault_type)?;

        let flags = args.flags();
        self.offset = flags.require_parsed::<u64>("offset")?;
        self.length = flags.require_parsed::<u64>("length")?;
        let size = meta.len();

        if self.length == 0 {
            return Err(FaultError::invalid_flag("length", "0", "must be positive"));
        }
        if self.offset >= size {
            return Err(FaultError::invalid_flag(
                "offset",
                self.offset.to_string(),
                format!("file is only {size} bytes"),
            ));
        }
        match self.offset.checked_add(self.length) {
            Some(end) if end < size => {}
            _ => {
                return Err(FaultError::invalid_flag(
                    "length",
                    self.length.to_string(),
                    format!("offset + length must stay below the file size of {size} bytes"),
                ))
            }
        }

        let backup_dir = self
            .target
            .backup
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let available = mounts::space_stats(backup_dir)?.available_bytes;
        if available < size {
            return Err(FaultError::InsufficientSpace {
                path: backup_dir.to_path_buf(),
                required: size,
                available,
            });
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let FileTarget { path, backup } = &self.target;

        fault_info!(self.fault_type, "Backing up {} to {}", path.display(), backup.display());
        tokio::fs::copy(path, backup)
            .await
            .map_err(|e| FaultError::io("back up", backup, e))?;

        let garbage = random_alphanumeric(self.length as usize);
        fault_info!(
            self.fault_type,
            "Overwriting {} bytes of {} at offset {}",
            self.length,
            path.display(),
            self.offset
        );

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| FaultError::io("open for corruption", path, e))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| FaultError::io("seek", path, e))?;
        file.write_all(&garbage)
            .await
            .map_err(|e| FaultError::io("overwrite", path, e))?;
        file.sync_all().await.map_err(|e| FaultError::io("sync", path, e))?;
        Ok(())
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Restoring {} from backup", self.target.path.display());
        move_file(&self.target.backup, &self.target.path).await
    }
}

/// Moves the file away to its backup name
pub struct FileLost {
    fault_type: FaultType,
    target: FileTarget,
}

impl FileLost {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(FILE_LOST),
            target: FileTarget::default(),
        }
    }
}

impl Default for FileLost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for FileLost {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.target = FileTarget::from_args(args, &self.fault_type)?;

        match args.op_kind()? {
            OpKind::Inject => {
                self.target.require_regular_file().await?;
                self.target.reject_existing_backup(&self.fault_type)
            }
            OpKind::Remove => self.target.require_backup(),
        }
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        move_file(&self.target.path, &self.target.backup).await
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        move_file(&self.target.backup, &self.target.path).await
    }
}

/// Sets the immutable inode attribute
pub struct FileReadonly {
    fault_type: FaultType,
    path: PathBuf,
}

impl FileReadonly {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(FILE_READONLY),
            path: PathBuf::new(),
        }
    }
}

impl Default for FileReadonly {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for FileReadonly {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.path = PathBuf::from(required_str(&args.flags(), "path")?);
        if !self.path.exists() {
            return Err(FaultError::target_absent(self.path.display().to_string()));
        }

        let immutable = file_attr::is_immutable(&self.path)?;
        match args.op_kind()? {
            OpKind::Inject if immutable => Err(FaultError::already_injected(
                &self.fault_type,
                format!("{} is already immutable", self.path.display()),
            )),
            OpKind::Remove if !immutable => Err(FaultError::nothing_to_remove(
                &self.fault_type,
                format!("{} is not immutable", self.path.display()),
            )),
            _ => Ok(()),
        }
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        file_attr::set_immutable(&self.path, true)
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        file_attr::set_immutable(&self.path, false)
    }
}

/// Clears every execute bit, saving the original mode beside the file
pub struct FileUnexecuted {
    fault_type: FaultType,
    path: PathBuf,
    attr_backup: PathBuf,
}

impl FileUnexecuted {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(FILE_UNEXECUTED),
            path: PathBuf::new(),
            attr_backup: PathBuf::new(),
        }
    }

    async fn saved_mode(&self) -> FaultResult<u32> {
        let raw = tokio::fs::read_to_string(&self.attr_backup)
            .await
            .map_err(|e| FaultError::io("read saved mode", &self.attr_backup, e))?;
        u32::from_str_radix(raw.trim(), 8).map_err(|e| {
            FaultError::io(
                "parse saved mode",
                &self.attr_backup,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }
}

impl Default for FileUnexecuted {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for FileUnexecuted {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        let target = FileTarget::from_args(args, &self.fault_type)?;
        self.attr_backup = PathBuf::from(format!("{}-attr", target.backup.display()));
        self.path = target.path;

        if args.op_kind()? == OpKind::Remove {
            if !self.attr_backup.exists() {
                return Err(FaultError::BackupNotFound {
                    path: self.attr_backup.clone(),
                });
            }
            return Ok(());
        }

        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|_| FaultError::target_absent(self.path.display().to_string()))?;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(FaultError::already_injected(
                &self.fault_type,
                format!("{} has no execute permission", self.path.display()),
            ));
        }
        if self.attr_backup.exists() {
            return Err(FaultError::already_injected(
                &self.fault_type,
                format!("saved mode {} exists", self.attr_backup.display()),
            ));
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| FaultError::io("stat", &self.path, e))?;
        let mode = meta.permissions().mode() & 0o7777;

        tokio::fs::write(&self.attr_backup, format!("{mode:o}\n"))
            .await
            .map_err(|e| FaultError::io("save mode", &self.attr_backup, e))?;

        fault_info!(
            self.fault_type,
            "Changing mode of {} from {:o} to {:o}",
            self.path.display(),
            mode,
            mode & !0o111
        );
        tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode & !0o111))
            .await
            .map_err(|e| FaultError::io("chmod", &self.path, e))
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let mode = self.saved_mode().await?;
        fault_info!(self.fault_type, "Restoring mode {:o} on {}", mode, self.path.display());

        tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| FaultError::io("chmod", &self.path, e))?;
        tokio::fs::remove_file(&self.attr_backup)
            .await
            .map_err(|e| FaultError::io("remove saved mode", &self.attr_backup, e))
    }
}
