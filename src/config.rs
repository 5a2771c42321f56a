//! Configuration for packstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a pack repository
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Layout Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the repository
    /// Internal structure:
    ///   {repo_dir}/
    ///     ├── pack-names       (manifest)
    ///     ├── lock             (advisory write lock)
    ///     ├── packs/           (published containers)
    ///     ├── indices/         (.rix/.iix/.tix/.six files)
    ///     ├── upload/          (staging containers)
    ///     └── obsolete_packs/  (superseded packs)
    pub repo_dir: PathBuf,

    /// Create the layout on open if the manifest is missing
    pub create_if_missing: bool,

    // -------------------------------------------------------------------------
    // Write Configuration
    // -------------------------------------------------------------------------
    /// Bytes buffered by a container writer before they hit the file
    pub write_buffer_size: usize,

    /// fsync policy for published files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Run the autopack planner after every write group commit
    pub autopack: bool,
}

/// When published files are fsynced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync packs, indices and the manifest before they become visible
    Always,

    /// Leave durability to the OS (tests, throwaway repositories)
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("./packstore_data"),
            create_if_missing: true,
            write_buffer_size: 64 * 1024, // 64 KB
            sync_strategy: SyncStrategy::Always,
            autopack: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the repository directory
    pub fn repo_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.repo_dir = path.into();
        self
    }

    /// Create the layout when opening a missing repository
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    /// Set the container write buffer threshold (in bytes)
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable autopack after commit
    pub fn autopack(mut self, enabled: bool) -> Self {
        self.config.autopack = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
