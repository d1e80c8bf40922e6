use std::{fs, path::PathBuf};

use common::prelude::{Passphrase, ProductLine};
use object_store::ObjectStoreConfig;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "casevault";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const FILES_DIR_NAME: &str = "files";
pub const STAGING_DIR_NAME: &str = "staging";
pub const EXPORTS_DIR_NAME: &str = "exports";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Product line ops act on unless told otherwise
    #[serde(default = "default_product_line")]
    pub product_line: ProductLine,
    /// Project secret every stored document is sealed under
    #[serde(default)]
    pub secret_key: Passphrase,
    /// Where sealed documents live
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upper bound on attachments processed concurrently (defaults to the
    /// available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Default log level, overridable with RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for log files (logs to stdout only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_product_line() -> ProductLine {
    ProductLine::Gtt
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            product_line: default_product_line(),
            secret_key: Passphrase::default(),
            storage: StorageConfig::default(),
            workers: None,
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Configuration for the storage backend.
/// This determines where sealed documents are kept (local tree or object storage).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Directory tree on this host, optionally replicated to the cluster
    Filesystem {
        /// Root of the tree (defaults to <vault dir>/files/)
        #[serde(default)]
        path: Option<PathBuf>,
        /// Command run with a changed record directory as its last argument
        #[serde(default)]
        cluster_sync_command: Option<String>,
    },

    /// In-memory object storage (lost on exit)
    Memory,

    /// S3-compatible object storage
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        #[serde(default)]
        region: Option<String>,
        /// Optional key prefix (defaults to "tqmc_files")
        #[serde(default)]
        prefix: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem {
            path: None,
            cluster_sync_command: None,
        }
    }
}

impl StorageConfig {
    /// Object storage configuration for the remote variants.
    pub fn object_store(&self) -> Option<ObjectStoreConfig> {
        match self {
            StorageConfig::Filesystem { .. } => None,
            StorageConfig::Memory => Some(ObjectStoreConfig::Memory),
            StorageConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
                prefix,
            } => Some(ObjectStoreConfig::S3 {
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                bucket: bucket.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the vault directory (~/.casevault)
    pub vault_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Root of the filesystem backend
    pub files_path: PathBuf,
    /// Where uploads wait to be reconciled
    pub staging_path: PathBuf,
    /// Per-session download directories
    pub exports_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the vault directory path (custom or default ~/.casevault)
    pub fn vault_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new vault directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        if vault_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&vault_dir)?;

        let state = Self::at(vault_dir, config.unwrap_or_default());
        fs::create_dir_all(state.files_root())?;
        fs::create_dir_all(&state.staging_path)?;
        fs::create_dir_all(&state.exports_path)?;

        let config_toml = toml::to_string_pretty(&state.config)?;
        fs::write(&state.config_path, config_toml)?;

        // Create empty database (migrations run on first connect)
        fs::write(&state.db_path, "")?;

        Ok(state)
    }

    /// Load existing state from the vault directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        if !vault_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = vault_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        let state = Self::at(vault_dir, config);
        if !state.db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !state.staging_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", STAGING_DIR_NAME)));
        }
        Ok(state)
    }

    fn at(vault_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            db_path: vault_dir.join(DB_FILE_NAME),
            files_path: vault_dir.join(FILES_DIR_NAME),
            staging_path: vault_dir.join(STAGING_DIR_NAME),
            exports_path: vault_dir.join(EXPORTS_DIR_NAME),
            config_path: vault_dir.join(CONFIG_FILE_NAME),
            vault_dir,
            config,
        }
    }

    /// Root of the filesystem backend, honouring a configured override.
    pub fn files_root(&self) -> PathBuf {
        match &self.config.storage {
            StorageConfig::Filesystem {
                path: Some(path), ..
            } => path.clone(),
            _ => self.files_path.clone(),
        }
    }

    /// Directory of the export session `name`.
    pub fn session_dir(&self, name: &str) -> Result<PathBuf, StateError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StateError::InvalidSession(name.to_string()));
        }
        Ok(self.exports_path.join(name))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("vault directory not initialized. Run 'casevault init' first")]
    NotInitialized,

    #[error("vault directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid session name: {0:?}")]
    InvalidSession(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("vault");

        let config = AppConfig {
            product_line: ProductLine::Soc,
            secret_key: Passphrase::new("  project  "),
            ..Default::default()
        };
        let state = AppState::init(Some(dir.clone()), Some(config)).unwrap();
        assert!(state.files_path.exists());
        assert!(state.staging_path.exists());

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config.product_line, ProductLine::Soc);
        assert_eq!(loaded.config.secret_key.expose(), "project");

        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_storage_config_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            product_line = "mn"
            secret_key = "s"

            [storage]
            type = "s3"
            endpoint = "http://localhost:9000"
            access_key = "k"
            secret_key = "s"
            bucket = "vault"
            "#,
        )
        .unwrap();
        assert_eq!(config.product_line, ProductLine::Mn);
        match config.storage.object_store() {
            Some(ObjectStoreConfig::S3 { bucket, prefix, .. }) => {
                assert_eq!(bucket, "vault");
                assert!(prefix.is_none());
            }
            other => panic!("unexpected storage config {:?}", other),
        }

        let defaults: AppConfig = toml::from_str("").unwrap();
        assert!(defaults.storage.object_store().is_none());
        assert_eq!(defaults.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_session_names() {
        let state = AppState::at(PathBuf::from("/v"), AppConfig::default());
        assert_eq!(
            state.session_dir("s-1").unwrap(),
            PathBuf::from("/v/exports/s-1")
        );
        assert!(state.session_dir("../etc").is_err());
        assert!(state.session_dir("").is_err());
    }
}
