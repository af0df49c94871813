//! Preview cache configuration.
//!
//! Configuration can be built programmatically, loaded from environment
//! variables, or read from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MB: usize = 1024 * 1024;

pub const ENV_CACHE_MB: &str = "SHELF_PREVIEW_CACHE_MB";
pub const ENV_EVICTION: &str = "SHELF_PREVIEW_EVICTION";
pub const ENV_FORMAT: &str = "SHELF_PREVIEW_FORMAT";
pub const ENV_THUMBNAIL_DIR: &str = "SHELF_THUMBNAIL_DIR";

/// Order in which the memory tier gives entries up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Reads move an entry to the back of the queue.
    #[default]
    Lru,
    /// Entries leave in insertion order regardless of reads.
    Fifo,
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            _ => Err(ConfigError::InvalidValue(format!("eviction policy `{value}`"))),
        }
    }
}

/// Encoding of preview files on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFormat {
    #[default]
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl PreviewFormat {
    pub const ALL: [PreviewFormat; 2] = [PreviewFormat::Png, PreviewFormat::Jpg];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

impl FromStr for PreviewFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            _ => Err(ConfigError::InvalidValue(format!("preview format `{value}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Byte budget of the memory tier.
    pub memory_budget: usize,
    pub eviction: EvictionPolicy,
    /// Fraction of the budget the memory tier shrinks to once it overflows.
    pub low_watermark: f64,
    pub format: PreviewFormat,
    pub thumbnail_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: 50 * MB,
            eviction: EvictionPolicy::Lru,
            low_watermark: 0.5,
            format: PreviewFormat::Png,
            thumbnail_dir: Self::default_thumbnail_dir(),
        }
    }
}

/// On-disk shape of [`CacheConfig`]; every key is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheConfigFile {
    memory_budget_mb: Option<usize>,
    eviction: Option<EvictionPolicy>,
    low_watermark: Option<f64>,
    format: Option<PreviewFormat>,
    thumbnail_dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Budget in MiB, saturating at `usize::MAX` bytes.
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.memory_budget = mb.saturating_mul(MB);
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_low_watermark(mut self, ratio: f64) -> Self {
        self.low_watermark = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_format(mut self, format: PreviewFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_thumbnail_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.thumbnail_dir = path.as_ref().to_path_buf();
        self
    }

    /// Platform cache directory, e.g. `~/.cache/shelf/thumbnails` on Linux.
    pub fn default_thumbnail_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(cache_dir) => cache_dir.join("shelf").join("thumbnails"),
            None => PathBuf::from("cache/thumbnails"),
        }
    }

    pub fn memory_mb(&self) -> usize {
        self.memory_budget / MB
    }

    /// Defaults overridden by `SHELF_PREVIEW_CACHE_MB`,
    /// `SHELF_PREVIEW_EVICTION`, `SHELF_PREVIEW_FORMAT` and
    /// `SHELF_THUMBNAIL_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Applies any set environment variables on top of `self`.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_CACHE_MB) {
            let mb = val
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(ENV_CACHE_MB.to_string()))?;
            self.memory_budget = megabytes(mb, ENV_CACHE_MB)?;
        }

        if let Ok(val) = std::env::var(ENV_EVICTION) {
            self.eviction = val.parse()?;
        }

        if let Ok(val) = std::env::var(ENV_FORMAT) {
            self.format = val.parse()?;
        }

        if let Ok(val) = std::env::var(ENV_THUMBNAIL_DIR) {
            self.thumbnail_dir = PathBuf::from(val);
        }

        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// ```toml
    /// memory_budget_mb = 50
    /// eviction = "fifo"
    /// low_watermark = 0.5
    /// format = "png"
    /// thumbnail_dir = "/path/to/thumbnails"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: CacheConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(mb) = file.memory_budget_mb {
            config.memory_budget = megabytes(mb, "memory_budget_mb")?;
        }
        if let Some(eviction) = file.eviction {
            config.eviction = eviction;
        }
        if let Some(ratio) = file.low_watermark {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::InvalidValue(format!("low_watermark {ratio}")));
            }
            config.low_watermark = ratio;
        }
        if let Some(format) = file.format {
            config.format = format;
        }
        if let Some(dir) = file.thumbnail_dir {
            config.thumbnail_dir = dir;
        }

        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = CacheConfigFile {
            memory_budget_mb: Some(self.memory_mb()),
            eviction: Some(self.eviction),
            low_watermark: Some(self.low_watermark),
            format: Some(self.format),
            thumbnail_dir: Some(self.thumbnail_dir.clone()),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }
}

fn megabytes(mb: usize, source: &str) -> Result<usize, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(format!("{source} {mb} is too large")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML write error: {0}")]
    Write(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: [&str; 4] = [ENV_CACHE_MB, ENV_EVICTION, ENV_FORMAT, ENV_THUMBNAIL_DIR];

    #[test]
    fn default_budget_is_fifty_megabytes() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_budget, 50 * 1024 * 1024);
        assert_eq!(config.eviction, EvictionPolicy::Lru);
        assert_eq!(config.low_watermark, 0.5);
        assert_eq!(config.format, PreviewFormat::Png);
    }

    #[test]
    fn builder_methods() {
        let config = CacheConfig::default()
            .with_memory_mb(8)
            .with_eviction(EvictionPolicy::Fifo)
            .with_low_watermark(1.5)
            .with_format(PreviewFormat::Jpg)
            .with_thumbnail_dir("/custom/path");

        assert_eq!(config.memory_mb(), 8);
        assert_eq!(config.eviction, EvictionPolicy::Fifo);
        assert_eq!(config.low_watermark, 1.0);
        assert_eq!(config.format.extension(), "jpg");
        assert_eq!(config.thumbnail_dir, PathBuf::from("/custom/path"));
    }

    #[test]
    #[serial]
    fn from_env_reads_every_variable() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_CACHE_MB, "16");
        env::set_var(ENV_EVICTION, "FIFO");
        env::set_var(ENV_FORMAT, "jpeg");
        env::set_var(ENV_THUMBNAIL_DIR, "/tmp/test-thumbs");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.memory_budget, 16 * 1024 * 1024);
        assert_eq!(config.eviction, EvictionPolicy::Fifo);
        assert_eq!(config.format, PreviewFormat::Jpg);
        assert_eq!(config.thumbnail_dir, PathBuf::from("/tmp/test-thumbs"));
    }

    #[test]
    #[serial]
    fn from_env_partial_keeps_defaults() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::remove_var(ENV_EVICTION);
        env::remove_var(ENV_FORMAT);
        env::remove_var(ENV_THUMBNAIL_DIR);
        env::set_var(ENV_CACHE_MB, "10");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.memory_budget, 10 * 1024 * 1024);
        assert_eq!(config.eviction, EvictionPolicy::Lru);
        assert_eq!(config.format, PreviewFormat::Png);
    }

    #[test]
    #[serial]
    fn from_env_rejects_invalid_values() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::remove_var(ENV_EVICTION);
        env::set_var(ENV_CACHE_MB, "lots");
        assert!(matches!(CacheConfig::from_env(), Err(ConfigError::InvalidValue(_))));

        env::set_var(ENV_CACHE_MB, usize::MAX.to_string());
        assert!(matches!(CacheConfig::from_env(), Err(ConfigError::InvalidValue(_))));

        env::set_var(ENV_CACHE_MB, "1");
        env::set_var(ENV_EVICTION, "random");
        assert!(matches!(CacheConfig::from_env(), Err(ConfigError::InvalidValue(_))));
    }

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars =
                var_names.iter().map(|name| (name.to_string(), env::var(name).ok())).collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn from_toml_partial() {
        let config = CacheConfig::from_toml("memory_budget_mb = 4\neviction = \"fifo\"\n").unwrap();

        assert_eq!(config.memory_budget, 4 * 1024 * 1024);
        assert_eq!(config.eviction, EvictionPolicy::Fifo);
        assert_eq!(config.low_watermark, 0.5);
    }

    #[test]
    fn from_toml_rejects_unknown_keys_and_bad_ratios() {
        assert!(matches!(CacheConfig::from_toml("gpu_cache_mb = 1"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            CacheConfig::from_toml("low_watermark = 2.0"),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn oversized_budgets_are_rejected_or_saturated() {
        let toml = format!("memory_budget_mb = {}", i64::MAX);
        assert!(matches!(CacheConfig::from_toml(&toml), Err(ConfigError::InvalidValue(_))));

        assert_eq!(CacheConfig::default().with_memory_mb(usize::MAX).memory_budget, usize::MAX);
    }

    #[test]
    fn file_save_and_load() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let config_path = temp.path().join("cache.toml");

        let config = CacheConfig::default()
            .with_memory_mb(12)
            .with_format(PreviewFormat::Jpg)
            .with_thumbnail_dir("/tmp/thumbs");
        config.save_to_file(&config_path).unwrap();

        let loaded = CacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }
}
