//! Page store configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{ErrorCode, PageStoreError, PageStoreResult};

/// Default maximum size of one page map file (10 MiB).
pub const DEFAULT_MAX_SIZE_PER_PAGE_MAP: u64 = 10 * 1024 * 1024;

/// Default maximum size of all page map files of a session (100 MiB).
pub const DEFAULT_MAX_SIZE_PER_SESSION: u64 = 100 * 1024 * 1024;

/// Default number of concurrently open page map files.
pub const DEFAULT_FILE_CHANNEL_POOL_CAPACITY: usize = 50;

/// Default number of recently serialized pages kept in memory.
pub const DEFAULT_SERIALIZED_PAGES_CACHE_SIZE: usize = 50;

/// Default application name, used as prefix of the store folder.
pub const DEFAULT_APP_NAME: &str = "wicket";

/// Command-line arguments for the store maintenance tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "pagestore-rs")]
#[command(about = "Inspect and maintain a disk page store")]
#[command(version)]
pub struct Args {
    /// Folder holding the file stores. Defaults to the system temp dir.
    #[arg(long, short = 'l')]
    pub location: Option<PathBuf>,

    /// Application name the store belongs to.
    #[arg(long, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print sessions, page maps and page windows recorded in the index.
    Inspect {
        /// Only show this session.
        #[arg(long)]
        session: Option<String>,
    },
    /// Delete the file store of the application.
    Purge,
}

/// Page store configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Folder holding the file stores.
    pub location: PathBuf,
    /// Application name, used as prefix of the store folder.
    pub app_name: String,
    /// Maximum size of one page map file in bytes.
    pub max_size_per_page_map: u64,
    /// Maximum size of all page map files of a session in bytes.
    pub max_size_per_session: u64,
    /// Maximum number of concurrently open page map files.
    pub file_channel_pool_capacity: usize,
    /// Write pages on the calling task instead of the background writer.
    pub synchronous: bool,
    /// Number of recently serialized pages kept in memory (0 disables).
    pub serialized_pages_cache_size: usize,
    /// Write pages received through session replication to disk.
    pub store_after_session_replication: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: std::env::temp_dir(),
            app_name: DEFAULT_APP_NAME.to_string(),
            max_size_per_page_map: DEFAULT_MAX_SIZE_PER_PAGE_MAP,
            max_size_per_session: DEFAULT_MAX_SIZE_PER_SESSION,
            file_channel_pool_capacity: DEFAULT_FILE_CHANNEL_POOL_CAPACITY,
            synchronous: false,
            serialized_pages_cache_size: DEFAULT_SERIALIZED_PAGES_CACHE_SIZE,
            store_after_session_replication: true,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            location: args.location.unwrap_or_else(std::env::temp_dir),
            app_name: args.app_name,
            ..Self::default()
        }
    }
}

impl Config {
    /// Folder of the disk page store of this application.
    pub fn store_folder(&self) -> PathBuf {
        self.location.join(format!("{}-filestore", self.app_name))
    }

    /// Folder of the simple one-file-per-page store of this application.
    pub fn simple_store_folder(&self) -> PathBuf {
        self.location.join(format!("{}-filestore-simple", self.app_name))
    }

    /// Checks the limits before a store is built from this configuration.
    pub fn validate(&self) -> PageStoreResult<()> {
        if self.max_size_per_session < self.max_size_per_page_map {
            return Err(PageStoreError::with_message(
                ErrorCode::InvalidConfiguration,
                format!(
                    "Maximum session size ({}) must not be smaller than maximum page map size ({})",
                    self.max_size_per_session, self.max_size_per_page_map
                ),
            ));
        }
        if self.file_channel_pool_capacity == 0 {
            return Err(PageStoreError::with_message(
                ErrorCode::InvalidConfiguration,
                "File channel pool capacity must be at least 1",
            ));
        }
        if self.app_name.is_empty() {
            return Err(PageStoreError::with_message(
                ErrorCode::InvalidConfiguration,
                "Application name must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.synchronous);
        assert!(config.store_folder().ends_with("wicket-filestore"));
    }

    #[test]
    fn test_session_smaller_than_page_map_is_rejected() {
        let config = Config {
            max_size_per_page_map: 200,
            max_size_per_session: 100,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_args_override_location() {
        let args = Args::parse_from(["pagestore-rs", "-l", "/tmp/pages", "--app-name", "shop", "purge"]);
        let config = Config::from(args);
        assert_eq!(config.store_folder(), PathBuf::from("/tmp/pages/shop-filestore"));
    }
}
