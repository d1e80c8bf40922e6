// Cluster propagation for the co-located filesystem backend
pub mod cluster;

// Record file persistence and case workflow lookups
pub mod database;

pub mod logging;

// Vault wiring over the configured backend and database
pub mod service;

// App state (configuration, paths)
pub mod state;

pub use database::{Database, DatabaseSetupError};
pub use service::{Service, ServiceError};
pub use state::{AppConfig, AppState, StateError, StorageConfig};
