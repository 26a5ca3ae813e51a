//! Layered configuration for kura.
//!
//! Values are merged from, in increasing priority:
//!
//! 1. built-in defaults,
//! 2. a config file (TOML, YAML or JSON, picked by extension),
//! 3. `KURA_`-prefixed environment variables, with `__` separating nested
//!    keys (`KURA_SYNC__MAX_CONCURRENCY=2`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "KURA_";
const DEFAULT_BASE_URL: &str = "https://kitsu.io/api/edge";
const DEFAULT_CONFIG_FILE: &str = "kura.toml";
const DEFAULT_DATABASE_FILE: &str = "library.db";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "kura")
}

/// Where the config file is looked for when none is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding the local library copy.
    pub path: PathBuf,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|dirs| dirs.data_dir().join(DEFAULT_DATABASE_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE));
        Self { path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Path of the library listing, relative to `base_url`.
    pub library_path: String,
    /// Records requested per page.
    pub page_limit: u64,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            library_path: "/library-entries".to_string(),
            page_limit: 20,
            timeout_secs: 30,
        }
    }
}
impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Categories fetched at the same time.
    pub max_concurrency: usize,
    /// Retries of a category after a transient failure.
    pub max_retry_count: u32,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retry_count: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, the file at
    /// [`default_config_path`] is used if there is one.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        };
        Self::extract(file.as_deref())
    }

    fn extract(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "reading config file");
            let extension = file.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
            figment = match extension.to_ascii_lowercase().as_str() {
                "toml" => figment.merge(Toml::file(file)),
                "yaml" | "yml" => figment.merge(Yaml::file(file)),
                "json" => figment.merge(Json::file(file)),
                other => exn::bail!(ErrorKind::UnsupportedFormat(other.to_string())),
            };
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.base_url.is_empty() {
            exn::bail!(ErrorKind::Invalid("remote.base_url must not be empty"));
        }
        if self.remote.library_path.is_empty() {
            exn::bail!(ErrorKind::Invalid("remote.library_path must not be empty"));
        }
        if self.remote.page_limit == 0 {
            exn::bail!(ErrorKind::Invalid("remote.page_limit must be positive"));
        }
        if self.remote.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("remote.timeout_secs must be positive"));
        }
        if self.sync.max_concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("sync.max_concurrency must be positive"));
        }
        Ok(())
    }
}
