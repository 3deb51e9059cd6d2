//! Filesystem faults: io stress, space fill and inode exhaustion

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use shared::{fault_info, fault_warn, FaultModule, FaultType, OpKind, RunArgs};

use super::required_str;
use super::stress::StressFault;
use crate::config::EngineConfig;
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::services::exhaustion::{self, ExhaustionJob, HostFilesystem};
use crate::services::{mounts, signals};
use crate::traits::{check_dependencies, CommandRunner, FaultPlugin, ProcessLocator};

pub const FILESYSTEM_IO_OVERLOAD: &str = "filesystem-io-overload";
pub const FILESYSTEM_SPACE_FULL: &str = "filesystem-mountpoint-space-full";
pub const FILESYSTEM_INODE_EXHAUSTION: &str = "filesystem-mountpoint-inode-exhaustion";

const MIB: u64 = 1024 * 1024;

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::Filesystem, FILESYSTEM_IO_OVERLOAD, io_overload);
    registry.register(FaultModule::Filesystem, FILESYSTEM_SPACE_FULL, space_full);
    registry.register(FaultModule::Filesystem, FILESYSTEM_INODE_EXHAUSTION, inode_exhaustion);
}

fn io_overload(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(StressFault::new(ctx, FILESYSTEM_IO_OVERLOAD, &[]))
}

fn space_full(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(SpaceFull::new(ctx))
}

fn inode_exhaustion(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(InodeExhaustion::new(ctx))
}

/// Fills a mount point with a zero-filled image written by a detached `dd`
pub struct SpaceFull {
    runner: Arc<dyn CommandRunner>,
    locator: Arc<dyn ProcessLocator>,
    fault_type: FaultType,
    image: PathBuf,
    size_mib: u64,
}

impl SpaceFull {
    pub fn new(ctx: &FaultContext) -> Self {
        Self {
            runner: ctx.runner.clone(),
            locator: ctx.locator.clone(),
            fault_type: FaultType::new(FILESYSTEM_SPACE_FULL),
            image: PathBuf::new(),
            size_mib: 0,
        }
    }

    /// Prefix shared by the launch command and the teardown search
    fn dd_search(&self) -> String {
        format!("dd if=/dev/zero of={}", self.image.display())
    }

    pub fn dd_command(&self) -> String {
        format!("{} bs=1M count={}", self.dd_search(), self.size_mib)
    }

    fn reject_existing_image(&self) -> FaultResult<()> {
        if self.image.exists() {
            return Err(FaultError::already_injected(
                &self.fault_type,
                format!("image {} exists", self.image.display()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FaultPlugin for SpaceFull {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.runner.as_ref(), &["dd", "ps"])?;
        let flags = args.flags();
        let mount = mounts::validate_mount_point(required_str(&flags, "path")?.as_ref())?;
        self.image = mount.join(format!("{}-image", self.fault_type));

        if args.op_kind()? == OpKind::Remove {
            return Ok(());
        }

        self.reject_existing_image()?;

        let available = mounts::space_stats(&mount)?.available_bytes;
        self.size_mib = match flags.parse_value::<u64>("size")? {
            Some(size) => size,
            None => available / MIB,
        };
        if self.size_mib == 0 {
            return Err(FaultError::InsufficientSpace {
                path: mount,
                required: MIB,
                available,
            });
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Filling {} MiB at {}", self.size_mib, self.image.display());
        self.runner.spawn_detached(&self.dd_command()).await
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let pids = self.locator.locate(&self.dd_search()).await?;
        let killed = signals::kill_all(&pids)?;
        if killed > 0 {
            fault_info!(self.fault_type, "Stopped {} running dd process(es)", killed);
        }

        if !self.image.exists() {
            if killed == 0 {
                return Err(FaultError::nothing_to_remove(
                    &self.fault_type,
                    format!("no image at {} and no dd running", self.image.display()),
                ));
            }
            return Ok(());
        }

        fault_info!(self.fault_type, "Deleting {}", self.image.display());
        tokio::fs::remove_file(&self.image)
            .await
            .map_err(|e| FaultError::io("remove image", &self.image, e))
    }
}

/// Drives a mount point out of inodes with the exhaustion worker pool
pub struct InodeExhaustion {
    runner: Arc<dyn CommandRunner>,
    locator: Arc<dyn ProcessLocator>,
    config: EngineConfig,
    exe_name: String,
    fault_type: FaultType,
    raw_path: String,
    mount: PathBuf,
}

impl InodeExhaustion {
    pub fn new(ctx: &FaultContext) -> Self {
        Self {
            runner: ctx.runner.clone(),
            locator: ctx.locator.clone(),
            config: ctx.config.clone(),
            exe_name: ctx.exe_name(),
            fault_type: FaultType::new(FILESYSTEM_INODE_EXHAUSTION),
            raw_path: String::new(),
            mount: PathBuf::new(),
        }
    }

    /// Command line of a still-running inject invocation for this mount
    pub fn inject_search(&self) -> String {
        format!(
            "{} inject {} {} --path {}",
            self.exe_name,
            FaultModule::Filesystem,
            self.fault_type,
            self.raw_path
        )
    }

    fn reject_existing_root(&self) -> FaultResult<()> {
        let root = exhaustion::test_root(&self.mount);
        if root.exists() {
            return Err(FaultError::already_injected(
                &self.fault_type,
                format!("test directory {} exists", root.display()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FaultPlugin for InodeExhaustion {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.runner.as_ref(), &["ps"])?;
        let flags = args.flags();
        self.raw_path = required_str(&flags, "path")?.to_string();
        self.mount = mounts::validate_mount_point(self.raw_path.as_ref())?;

        if args.op_kind()? == OpKind::Inject {
            self.reject_existing_root()?;
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let job = ExhaustionJob::new(&self.mount, self.config.exhaustion_workers, self.config.files_per_dir);
        tokio::fs::create_dir(job.root())
            .await
            .map_err(|e| FaultError::io("create test directory", job.root(), e))?;

        fault_info!(
            self.fault_type,
            "Exhausting inodes on {} with {} workers",
            self.mount.display(),
            job.workers()
        );
        let summary = job.run(Arc::new(HostFilesystem::new(&self.mount))).await?;
        fault_info!(
            self.fault_type,
            "Created {} directories in {} round(s)",
            summary.directories,
            summary.rounds
        );
        Ok(())
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let search = self.inject_search();
        let pids = self.locator.locate(&search).await?;
        let killed = signals::kill_all(&pids)?;
        if killed > 0 {
            fault_info!(self.fault_type, "Stopped {} running inject process(es)", killed);
        }

        let root = exhaustion::test_root(&self.mount);
        if !root.exists() {
            if killed == 0 {
                return Err(FaultError::nothing_to_remove(
                    &self.fault_type,
                    format!("no test directory at {}", root.display()),
                ));
            }
            return Ok(());
        }

        let report = exhaustion::teardown(&root, self.config.exhaustion_workers).await?;
        for (dir, reason) in &report.failures {
            fault_warn!(self.fault_type, "Could not remove {}: {}", dir.display(), reason);
        }
        fault_info!(
            self.fault_type,
            "Removed {} directories in {} batch(es)",
            report.removed,
            report.batches.len()
        );

        exhaustion::remove_test_root_or_exit(&root);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Child, Command};

    use crate::traits::{MockCommandRunner, MockProcessLocator};

    fn context(exe: &str) -> FaultContext {
        FaultContext::new(
            Arc::new(MockCommandRunner::new()),
            Arc::new(MockProcessLocator::new()),
            EngineConfig::default(),
            exe,
        )
    }

    fn context_with(locator: MockProcessLocator) -> FaultContext {
        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().returning(|_| true);
        FaultContext::new(Arc::new(runner), Arc::new(locator), EngineConfig::default(), "/opt/arsenal/arsenal")
    }

    fn args(line: &str) -> RunArgs {
        RunArgs::new(line.split_whitespace().map(str::to_string).collect())
    }

    fn sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("sleep is available")
    }

    fn locating(expected: String, pids: Vec<u32>) -> MockProcessLocator {
        let mut locator = MockProcessLocator::new();
        locator
            .expect_locate()
            .withf(move |search| search == expected)
            .times(1)
            .returning(move |_| Ok(pids.clone()));
        locator
    }

    #[test]
    fn test_inject_search_names_mount() {
        let mut fault = InodeExhaustion::new(&context("/usr/local/bin/arsenal"));
        fault.raw_path = "/mnt/data".to_string();

        assert_eq!(
            fault.inject_search(),
            "arsenal inject filesystem filesystem-mountpoint-inode-exhaustion --path /mnt/data"
        );
    }

    #[test]
    fn test_dd_command_shape() {
        let mut fault = SpaceFull::new(&context("/opt/arsenal/arsenal"));
        fault.image = PathBuf::from("/mnt/data/filesystem-mountpoint-space-full-image");
        fault.size_mib = 512;

        assert_eq!(
            fault.dd_command(),
            "dd if=/dev/zero of=/mnt/data/filesystem-mountpoint-space-full-image bs=1M count=512"
        );
    }

    #[tokio::test]
    async fn test_missing_dd_is_reported() {
        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().returning(|name| name != "dd");
        let ctx = FaultContext::new(
            Arc::new(runner),
            Arc::new(MockProcessLocator::new()),
            EngineConfig::default(),
            "/opt/arsenal/arsenal",
        );

        let mut fault = SpaceFull::new(&ctx);
        let args = RunArgs::new(
            "arsenal inject filesystem filesystem-mountpoint-space-full --path /"
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        );
        let err = fault.prepare(&args).await.unwrap_err();
        assert!(matches!(err, FaultError::MissingCommand { ref command } if command == "dd"));
    }

    #[tokio::test]
    async fn test_inode_remove_kills_running_inject() {
        // Arrange
        let child = sleeper();
        let search = "arsenal inject filesystem filesystem-mountpoint-inode-exhaustion --path /";
        let ctx = context_with(locating(search.to_string(), vec![child.id()]));
        let mut fault = InodeExhaustion::new(&ctx);
        let remove = args("arsenal remove filesystem filesystem-mountpoint-inode-exhaustion --path /");

        // Act
        fault.prepare(&remove).await.unwrap();
        let result = fault.remove(&remove).await;

        // Assert
        assert!(result.is_ok());
        let status = child.wait_with_output().unwrap().status;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_inode_remove_without_root_or_process() {
        let search = "arsenal inject filesystem filesystem-mountpoint-inode-exhaustion --path /";
        let ctx = context_with(locating(search.to_string(), Vec::new()));
        let mut fault = InodeExhaustion::new(&ctx);
        let remove = args("arsenal remove filesystem filesystem-mountpoint-inode-exhaustion --path /");

        fault.prepare(&remove).await.unwrap();
        let err = fault.remove(&remove).await.unwrap_err();

        assert!(matches!(err, FaultError::NothingToRemove { .. }));
    }

    #[test]
    fn test_inode_second_inject_is_rejected_while_root_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut fault = InodeExhaustion::new(&context("/opt/arsenal/arsenal"));
        fault.mount = dir.path().to_path_buf();
        assert!(fault.reject_existing_root().is_ok());

        std::fs::create_dir(exhaustion::test_root(dir.path())).unwrap();

        let err = fault.reject_existing_root().unwrap_err();
        assert!(matches!(err, FaultError::AlreadyInjected { .. }));
    }

    #[tokio::test]
    async fn test_space_remove_kills_dd_and_deletes_image() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("filesystem-mountpoint-space-full-image");
        std::fs::write(&image, b"zeros").unwrap();
        let child = sleeper();
        let search = format!("dd if=/dev/zero of={}", image.display());
        let ctx = context_with(locating(search, vec![child.id()]));
        let mut fault = SpaceFull::new(&ctx);
        fault.image = image.clone();

        // Act
        let result = fault.remove(&args("arsenal remove filesystem filesystem-mountpoint-space-full")).await;

        // Assert
        assert!(result.is_ok());
        assert!(!image.exists());
        let status = child.wait_with_output().unwrap().status;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_space_remove_without_image_or_dd() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("filesystem-mountpoint-space-full-image");
        let search = format!("dd if=/dev/zero of={}", image.display());
        let mut fault = SpaceFull::new(&context_with(locating(search, Vec::new())));
        fault.image = image;

        let err = fault
            .remove(&args("arsenal remove filesystem filesystem-mountpoint-space-full"))
            .await
            .unwrap_err();

        assert!(matches!(err, FaultError::NothingToRemove { .. }));
    }

    #[test]
    fn test_space_inject_is_rejected_while_image_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut fault = SpaceFull::new(&context("/opt/arsenal/arsenal"));
        fault.image = dir.path().join("filesystem-mountpoint-space-full-image");
        assert!(fault.reject_existing_image().is_ok());

        std::fs::write(&fault.image, b"zeros").unwrap();

        let err = fault.reject_existing_image().unwrap_err();
        assert!(matches!(err, FaultError::AlreadyInjected { .. }));
    }
}
