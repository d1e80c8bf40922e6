use std::path::Path;
use std::sync::Arc;

use common::prelude::*;
use object_store::RemoteBackend;

use crate::cluster::{ClusterSyncError, CommandClusterSync};
use crate::database::{Database, DatabaseSetupError};
use crate::state::{AppState, StorageConfig};

/// Everything an op needs to reconcile and export attachments: the vault
/// wired over the configured backend and the SQLite record store.
#[derive(Debug, Clone)]
pub struct Service {
    vault: Vault,
    database: Database,
    state: AppState,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database setup failed: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("remote storage setup failed: {0}")]
    RemoteStore(#[from] object_store::RemoteStoreError),

    #[error("invalid cluster sync command: {0}")]
    ClusterSync(#[from] ClusterSyncError),
}

impl Service {
    pub async fn from_state(state: AppState) -> Result<Self, ServiceError> {
        let database = Database::connect(&state.db_path).await?;
        Self::with_database(state, database).await
    }

    /// Wire the vault over an already opened database.
    pub async fn with_database(state: AppState, database: Database) -> Result<Self, ServiceError> {
        let backend = build_backend(&state).await?;
        let options = match state.config.workers {
            Some(workers) => VaultOptions { workers },
            None => VaultOptions::default(),
        };

        tracing::info!(
            backend = backend.name(),
            product_line = %state.config.product_line,
            "vault ready"
        );
        let vault = Vault::new(
            DocumentCipher::new(state.config.secret_key.clone()),
            backend,
            Arc::new(database.clone()),
            options,
        );

        Ok(Self {
            vault,
            database,
            state,
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn product_line(&self) -> ProductLine {
        self.state.config.product_line
    }

    /// Reconcile a record against `desired`, taking new uploads from
    /// `staging_dir` and dropping download keys of deleted files from
    /// `exports`.
    pub async fn reconcile(
        &self,
        product: ProductLine,
        record_id: &str,
        desired: &[AttachmentDescriptor],
        staging_dir: &Path,
        exports: Option<&dyn ExportRegistry>,
    ) -> Result<ReconcileReport, VaultError> {
        self.vault
            .reconcile(ReconcileRequest {
                product,
                record_id,
                desired,
                staging_dir,
                exports,
            })
            .await
    }
}

async fn build_backend(state: &AppState) -> Result<Arc<dyn StorageBackend>, ServiceError> {
    if let StorageConfig::Filesystem {
        cluster_sync_command,
        ..
    } = &state.config.storage
    {
        let mut backend = FilesystemBackend::new(state.files_root());
        if let Some(command) = cluster_sync_command {
            backend = backend.with_cluster_sync(Arc::new(CommandClusterSync::parse(command)?));
        }
        return Ok(Arc::new(backend));
    }

    match state.config.storage.object_store() {
        Some(config) => Ok(Arc::new(RemoteBackend::connect(config).await?)),
        None => Ok(Arc::new(FilesystemBackend::new(state.files_root()))),
    }
}
