//! Test fixtures and data for dispatcher tests

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Executable path handed to the fault context
    pub const EXE_PATH: &'static str = "/usr/local/bin/arsenal";

    /// Ten bytes; corruption tests overwrite a window in the middle
    pub const FILE_CONTENT: &'static [u8] = b"0123456789";
    pub const CORRUPT_OFFSET: u64 = 2;
    pub const CORRUPT_LENGTH: u64 = 3;

    /// Upper bound for waiting on process state changes
    pub const STATE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Write the standard content into `dir/name`
    pub fn sample_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, Self::FILE_CONTENT).unwrap();
        path
    }

    /// Expected backup location next to `path`
    pub fn backup_of(path: &Path, fault_type: &str) -> PathBuf {
        PathBuf::from(format!("{}-{}-backup", path.display(), fault_type))
    }
}
