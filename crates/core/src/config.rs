//! Engine configuration.

use serde::{Deserialize, Serialize};
use shelf_cache::{CacheConfig, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};
use storage::DataDir;

pub const ENV_DATA_DIR: &str = "SHELF_DATA_DIR";

/// When the cover preview of an imported document is generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverMode {
    /// During import, before it returns.
    #[default]
    Blocking,
    /// On the first open for viewing.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShelfConfig {
    /// Root of `pdf_cache.json`, `pdfs/` and `thumbnails/`. `None` resolves
    /// the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub cache: CacheConfig,
    /// Overrides `<data_dir>/thumbnails` as the preview directory.
    pub thumbnail_dir: Option<PathBuf>,
    pub default_buffer: u32,
    pub thumbnail_max_dimension: u32,
    pub default_thumbnail_scale: f32,
    pub min_thumbnail_scale: f32,
    pub cover_scale: f32,
    pub cover_mode: CoverMode,
    pub render_workers: usize,
    pub page_spacing: f32,
    pub viewport_height: f32,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache: CacheConfig::default(),
            thumbnail_dir: None,
            default_buffer: 2,
            thumbnail_max_dimension: 200,
            default_thumbnail_scale: 0.2,
            min_thumbnail_scale: 0.1,
            cover_scale: 1.5,
            cover_mode: CoverMode::Blocking,
            render_workers: default_render_workers(),
            page_spacing: 16.0,
            viewport_height: 800.0,
        }
    }
}

fn default_render_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get().min(4)).unwrap_or(2)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ShelfConfigFile {
    data_dir: Option<PathBuf>,
    thumbnail_dir: Option<PathBuf>,
    default_buffer: Option<u32>,
    thumbnail_max_dimension: Option<u32>,
    default_thumbnail_scale: Option<f32>,
    min_thumbnail_scale: Option<f32>,
    cover_scale: Option<f32>,
    cover_mode: Option<CoverMode>,
    render_workers: Option<usize>,
    page_spacing: Option<f32>,
    viewport_height: Option<f32>,
    cache: Option<toml::Table>,
}

impl ShelfConfig {
    pub fn with_data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_thumbnail_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.thumbnail_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_default_buffer(mut self, buffer: u32) -> Self {
        self.default_buffer = buffer;
        self
    }

    pub fn with_cover_mode(mut self, mode: CoverMode) -> Self {
        self.cover_mode = mode;
        self
    }

    pub fn with_render_workers(mut self, workers: usize) -> Self {
        self.render_workers = workers.max(1);
        self
    }

    pub fn with_viewport_height(mut self, height: f32) -> Self {
        self.viewport_height = height.max(0.0);
        self
    }

    pub fn with_page_spacing(mut self, spacing: f32) -> Self {
        self.page_spacing = spacing.max(0.0);
        self
    }

    /// Defaults plus the preview cache variables and `SHELF_DATA_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self { cache: CacheConfig::from_env()?, ..Self::default() };

        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var(shelf_cache::config::ENV_THUMBNAIL_DIR) {
            config.thumbnail_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses engine settings; preview cache settings live in a `[cache]`
    /// table.
    ///
    /// ```toml
    /// data_dir = "/var/lib/shelf"
    /// cover_mode = "deferred"
    /// default_buffer = 3
    ///
    /// [cache]
    /// memory_budget_mb = 32
    /// eviction = "fifo"
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ShelfConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(table) = file.cache {
            config.cache = CacheConfig::from_toml(&toml::to_string(&table)?)?;
        }

        config.data_dir = file.data_dir.or(config.data_dir);
        config.thumbnail_dir = file.thumbnail_dir.or(config.thumbnail_dir);
        config.default_buffer = file.default_buffer.unwrap_or(config.default_buffer);
        config.thumbnail_max_dimension =
            file.thumbnail_max_dimension.unwrap_or(config.thumbnail_max_dimension);
        config.default_thumbnail_scale =
            file.default_thumbnail_scale.unwrap_or(config.default_thumbnail_scale);
        config.min_thumbnail_scale = file.min_thumbnail_scale.unwrap_or(config.min_thumbnail_scale);
        config.cover_scale = file.cover_scale.unwrap_or(config.cover_scale);
        config.cover_mode = file.cover_mode.unwrap_or(config.cover_mode);
        config.render_workers = file.render_workers.unwrap_or(config.render_workers).max(1);
        config.page_spacing = file.page_spacing.unwrap_or(config.page_spacing);
        config.viewport_height = file.viewport_height.unwrap_or(config.viewport_height);

        for (key, scale) in [
            ("default_thumbnail_scale", config.default_thumbnail_scale),
            ("min_thumbnail_scale", config.min_thumbnail_scale),
            ("cover_scale", config.cover_scale),
        ] {
            if scale <= 0.0 || !scale.is_finite() {
                return Err(ConfigError::InvalidValue(key.to_string()));
            }
        }

        Ok(config)
    }

    pub(crate) fn resolve_data_dir(&self) -> Result<DataDir, storage::StorageError> {
        match &self.data_dir {
            Some(root) => Ok(DataDir::with_root(root)),
            None => DataDir::from_default_project(),
        }
    }

    /// Cache configuration with the preview directory resolved against the
    /// data directory.
    pub(crate) fn resolved_cache(&self, data: &DataDir) -> CacheConfig {
        let dir = self.thumbnail_dir.clone().unwrap_or_else(|| data.thumbnail_dir());
        self.cache.clone().with_thumbnail_dir(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use shelf_cache::EvictionPolicy;

    #[test]
    fn defaults_match_documented_values() {
        let config = ShelfConfig::default();

        assert_eq!(config.default_buffer, 2);
        assert_eq!(config.thumbnail_max_dimension, 200);
        assert_eq!(config.cover_scale, 1.5);
        assert_eq!(config.cover_mode, CoverMode::Blocking);
        assert!(config.render_workers >= 1);
    }

    #[test]
    fn from_toml_reads_nested_cache_table() {
        let config = ShelfConfig::from_toml(
            r#"
            data_dir = "/srv/shelf"
            cover_mode = "deferred"
            render_workers = 0

            [cache]
            memory_budget_mb = 32
            eviction = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/shelf")));
        assert_eq!(config.cover_mode, CoverMode::Deferred);
        assert_eq!(config.render_workers, 1);
        assert_eq!(config.cache.memory_mb(), 32);
        assert_eq!(config.cache.eviction, EvictionPolicy::Fifo);
    }

    #[test]
    fn from_toml_rejects_non_positive_scales() {
        assert!(matches!(
            ShelfConfig::from_toml("cover_scale = 0.0"),
            Err(ConfigError::InvalidValue(key)) if key == "cover_scale"
        ));
    }

    #[test]
    fn thumbnails_default_to_the_data_directory() {
        let config = ShelfConfig::default().with_data_dir("/data");
        let data = config.resolve_data_dir().unwrap();

        assert_eq!(config.resolved_cache(&data).thumbnail_dir, PathBuf::from("/data/thumbnails"));

        let overridden = config.with_thumbnail_dir("/elsewhere");
        assert_eq!(overridden.resolved_cache(&data).thumbnail_dir, PathBuf::from("/elsewhere"));
    }

    #[test]
    #[serial]
    fn from_env_reads_data_dir() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/shelf-env");
        let config = ShelfConfig::from_env();
        std::env::remove_var(ENV_DATA_DIR);

        assert_eq!(config.unwrap().data_dir, Some(PathBuf::from("/tmp/shelf-env")));
    }
}
