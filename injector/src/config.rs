//! Engine configuration with environment overrides

use std::path::{Path, PathBuf};
use std::str::FromStr;

use shared::parse_interval;
use tracing::warn;

/// Default stress tool location relative to the executable directory
pub const DEFAULT_STRESS_TOOL: &str = "third_party_tools/stress-ng";
/// Default duration of the stress tool validation run
pub const DEFAULT_VALIDATION_WINDOW: &str = "4s";
/// Default per-directory file cap for the exhaustion workers
pub const DEFAULT_FILES_PER_DIR: usize = 10_000;
pub const DEFAULT_SYSRQ_TRIGGER: &str = "/proc/sysrq-trigger";
pub const DEFAULT_CPU_SYSFS: &str = "/sys/devices/system/cpu";

/// Runtime knobs shared by every fault plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Stress tool path, absolute or relative to the executable directory
    pub stress_tool: PathBuf,
    /// Value passed as `-t <window>` during the validation run
    pub validation_window: String,
    /// Worker count W for the exhaustion pool
    pub exhaustion_workers: usize,
    pub files_per_dir: usize,
    pub sysrq_trigger: PathBuf,
    pub cpu_sysfs: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stress_tool: PathBuf::from(DEFAULT_STRESS_TOOL),
            validation_window: DEFAULT_VALIDATION_WINDOW.to_string(),
            exhaustion_workers: default_workers(),
            files_per_dir: DEFAULT_FILES_PER_DIR,
            sysrq_trigger: PathBuf::from(DEFAULT_SYSRQ_TRIGGER),
            cpu_sysfs: PathBuf::from(DEFAULT_CPU_SYSFS),
        }
    }
}

/// Twice the number of logical processing units
pub fn default_workers() -> usize {
    (num_cpus::get() * 2).max(1)
}

impl EngineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(tool) = lookup("ARSENAL_STRESS_TOOL").filter(|v| !v.trim().is_empty()) {
            config.stress_tool = PathBuf::from(tool.trim());
        }

        if let Some(window) = lookup("ARSENAL_VALIDATION_WINDOW") {
            match parse_interval(&window) {
                Ok(duration) if !duration.is_zero() => {
                    // stress-ng -t takes plain seconds with a unit suffix
                    config.validation_window = format!("{}s", duration.as_secs());
                }
                _ => warn!(
                    "Ignoring ARSENAL_VALIDATION_WINDOW={}: expected a non-zero interval, keeping {}",
                    window, config.validation_window
                ),
            }
        }

        if let Some(workers) = positive_override::<usize>(&lookup, "ARSENAL_EXHAUSTION_WORKERS") {
            config.exhaustion_workers = workers;
        }
        if let Some(files) = positive_override::<usize>(&lookup, "ARSENAL_FILES_PER_DIR") {
            config.files_per_dir = files;
        }
        if let Some(trigger) = lookup("ARSENAL_SYSRQ_TRIGGER").filter(|v| !v.trim().is_empty()) {
            config.sysrq_trigger = PathBuf::from(trigger.trim());
        }
        if let Some(sysfs) = lookup("ARSENAL_CPU_SYSFS").filter(|v| !v.trim().is_empty()) {
            config.cpu_sysfs = PathBuf::from(sysfs.trim());
        }

        config
    }

    /// Resolve the stress tool against the executable directory
    pub fn stress_tool_path(&self, exe_dir: &Path) -> PathBuf {
        if self.stress_tool.is_absolute() {
            self.stress_tool.clone()
        } else {
            exe_dir.join(&self.stress_tool)
        }
    }
}

fn positive_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default + std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!("Ignoring {}={}: expected a positive integer", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(|_| None);

        assert_eq!(config.validation_window, "4s");
        assert_eq!(config.files_per_dir, 10_000);
        assert_eq!(config.exhaustion_workers, num_cpus::get() * 2);
        assert_eq!(
            config.stress_tool_path(Path::new("/opt/arsenal")),
            PathBuf::from("/opt/arsenal/third_party_tools/stress-ng")
        );
    }

    #[test]
    fn test_overrides_apply() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ARSENAL_STRESS_TOOL", "/usr/bin/stress-ng"),
            ("ARSENAL_VALIDATION_WINDOW", "2s"),
            ("ARSENAL_EXHAUSTION_WORKERS", "3"),
            ("ARSENAL_FILES_PER_DIR", "50"),
        ]));

        assert_eq!(config.validation_window, "2s");
        assert_eq!(config.exhaustion_workers, 3);
        assert_eq!(config.files_per_dir, 50);
        assert_eq!(
            config.stress_tool_path(Path::new("/opt/arsenal")),
            PathBuf::from("/usr/bin/stress-ng")
        );
    }

    #[test]
    fn test_validation_window_is_normalized_to_seconds() {
        let compound = EngineConfig::from_lookup(lookup_from(&[("ARSENAL_VALIDATION_WINDOW", "1h:2m:3s")]));
        let bare = EngineConfig::from_lookup(lookup_from(&[("ARSENAL_VALIDATION_WINDOW", " 90 ")]));

        assert_eq!(compound.validation_window, "3723s");
        assert_eq!(bare.validation_window, "90s");
    }

    #[test]
    fn test_invalid_overrides_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ARSENAL_VALIDATION_WINDOW", "soon"),
            ("ARSENAL_EXHAUSTION_WORKERS", "0"),
            ("ARSENAL_FILES_PER_DIR", "many"),
        ]));

        assert_eq!(config.validation_window, DEFAULT_VALIDATION_WINDOW);
        assert_eq!(config.exhaustion_workers, default_workers());
        assert_eq!(config.files_per_dir, DEFAULT_FILES_PER_DIR);
    }
}
